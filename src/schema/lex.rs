//! Byte-lexicographic key conversion.
//!
//! Rewrites a packed row in place so that unsigned byte-wise comparison
//! of two converted rows agrees with [`Schema::compare_data`] on the
//! originals: signed integers get their sign bit flipped, multi-byte
//! integers are byte-swapped to big-endian, and floats go through the
//! IEEE-754 total-order transform. String and binary columns are already
//! byte-comparable and pass through untouched.

use crate::error::Result;

use super::{ColumnType, Schema};

impl Schema {
    /// In-place conversion of a packed row (or index key) into its
    /// byte-lexicographic form. Legal only when
    /// [`can_lex_convert`](Schema::can_lex_convert) holds; apply exactly
    /// once per buffer.
    pub fn byte_lex_convert(&self, buf: &mut [u8]) -> Result<()> {
        debug_assert!(self.can_lex_convert());
        if !self.need_lex_convert() {
            return Ok(());
        }
        let cols = self.parse_row(buf)?;
        for idx in 0..self.column_num() {
            let e = cols.cols[idx];
            let range = e.pos as usize..(e.pos + e.len) as usize;
            convert_col(self.column_type(idx), &mut buf[range]);
        }
        Ok(())
    }
}

fn convert_col(ty: ColumnType, v: &mut [u8]) {
    use ColumnType::*;
    match ty {
        Uint08 | Uuid | Fixed => {}
        Uint16 | Uint32 | Uint64 | Uint128 => v.reverse(),
        Sint08 => v[0] ^= 0x80,
        Sint16 | Sint32 | Sint64 | Sint128 | Decimal128 => {
            let last = v.len() - 1;
            v[last] ^= 0x80; // sign bit sits in the top little-endian byte
            v.reverse();
        }
        Float32 => {
            let bits = u32::from_le_bytes(v.try_into().unwrap());
            let ordered = if bits & (1 << 31) != 0 {
                !bits
            } else {
                bits | (1 << 31)
            };
            v.copy_from_slice(&ordered.to_be_bytes());
        }
        Float64 => {
            let bits = u64::from_le_bytes(v.try_into().unwrap());
            let ordered = if bits & (1 << 63) != 0 {
                !bits
            } else {
                bits | (1 << 63)
            };
            v.copy_from_slice(&ordered.to_be_bytes());
        }
        Float128 => {
            let key = f128_order_key(v);
            v.copy_from_slice(&key);
        }
        // var-len columns are byte-comparable as stored
        _ => {}
    }
}

/// Total-order key for a little-endian 128-bit IEEE float: negative
/// values have all bits flipped, non-negative values the sign bit set,
/// then the bytes are swapped to big-endian.
pub fn f128_order_key(v: &[u8]) -> [u8; 16] {
    let bits = u128::from_le_bytes(v.try_into().unwrap());
    let ordered = if bits & (1 << 127) != 0 {
        !bits
    } else {
        bits | (1 << 127)
    };
    ordered.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::schema::{ColumnMeta, ColumnType, Schema};

    fn compiled(cols: &[(&str, ColumnType)]) -> Schema {
        let mut s = Schema::new("lex");
        for (name, ty) in cols {
            s.add_column(name, ColumnMeta::new(*ty)).unwrap();
        }
        s.compile(None).unwrap();
        s
    }

    fn lexed(s: &Schema, row: &[u8]) -> Vec<u8> {
        let mut buf = row.to_vec();
        s.byte_lex_convert(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_sint32_order() {
        let s = compiled(&[("v", ColumnType::Sint32)]);
        let keys = [-2i32, -1, 0, 1, 2];
        let encoded: Vec<Vec<u8>> = keys
            .iter()
            .map(|v| lexed(&s, &v.to_le_bytes()))
            .collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_float64_order() {
        let s = compiled(&[("v", ColumnType::Float64)]);
        let keys = [f64::NEG_INFINITY, -1.5, -0.0, 0.0, 0.25, 7.0, f64::INFINITY];
        let encoded: Vec<Vec<u8>> = keys
            .iter()
            .map(|v| lexed(&s, &v.to_le_bytes()))
            .collect();
        for (i, w) in encoded.windows(2).enumerate() {
            // -0.0 and 0.0 are distinct under total order
            assert!(w[0] < w[1], "keys {} and {} out of order", keys[i], keys[i + 1]);
        }
    }

    #[test]
    fn test_memcmp_agrees_with_compare_data() {
        let s = compiled(&[("a", ColumnType::Sint64), ("b", ColumnType::Uint16)]);
        assert!(s.can_lex_convert());
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut x = Vec::new();
            x.extend_from_slice(&rng.gen::<i64>().to_le_bytes());
            x.extend_from_slice(&rng.gen::<u16>().to_le_bytes());
            let mut y = Vec::new();
            y.extend_from_slice(&rng.gen::<i64>().to_le_bytes());
            y.extend_from_slice(&rng.gen::<u16>().to_le_bytes());

            let semantic = s.compare_data(&x, &y);
            let bytewise = lexed(&s, &x).cmp(&lexed(&s, &y));
            assert_eq!(semantic, bytewise);
        }
    }

    #[test]
    fn test_terminal_string_passthrough() {
        let s = compiled(&[("id", ColumnType::Uint32), ("name", ColumnType::StrUtf8)]);
        assert!(s.can_lex_convert());
        let row = s.combine_cols(&[&7u32.to_le_bytes(), b"zed"]).unwrap();
        let conv = lexed(&s, &row);
        assert_eq!(&conv[4..], b"zed");
        assert_eq!(&conv[..4], &7u32.to_be_bytes());
    }

    #[test]
    fn test_varint_schema_cannot_convert() {
        let s = compiled(&[("v", ColumnType::VarUint)]);
        assert!(!s.can_lex_convert());
    }

    #[test]
    fn test_uint_only_schema_order() {
        let s = compiled(&[("v", ColumnType::Uint64)]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let a: u64 = rng.gen();
            let b: u64 = rng.gen();
            let ord = lexed(&s, &a.to_le_bytes()).cmp(&lexed(&s, &b.to_le_bytes()));
            assert_eq!(ord, a.cmp(&b), "a={a} b={b}");
        }
        assert_eq!(
            lexed(&s, &5u64.to_le_bytes()).cmp(&lexed(&s, &5u64.to_le_bytes())),
            Ordering::Equal
        );
    }
}
