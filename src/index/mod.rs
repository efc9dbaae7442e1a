//! Ordered indexes: the immutable permutation-sorted form readonly
//! segments serve from, and the mutable typed multimap writable
//! segments maintain.

pub mod readonly;
pub mod writable;

pub use readonly::{ReadonlyIndex, ReadonlyIndexIter};
pub use writable::{InsertOutcome, WritableIndex, WritableIndexIter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{ColumnType, Schema};

/// f32 ordered by the IEEE-754 total order, usable as a map key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for TotalF32 {}
impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// f64 ordered by the IEEE-754 total order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TotalF64(pub f64);

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for TotalF64 {}
impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A byte-string key whose natural byte order matches the schema order:
/// `ord` holds the byte-lex-converted form when the schema converts, and
/// `raw` the original projected key when the two differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytesKey {
    ord: Vec<u8>,
    raw: Option<Vec<u8>>,
}

impl BytesKey {
    pub fn raw(&self) -> &[u8] {
        self.raw.as_deref().unwrap_or(&self.ord)
    }
}

// The lex conversion is a bijection, so equal `ord` implies equal `raw`.
impl PartialEq for BytesKey {
    fn eq(&self, other: &Self) -> bool {
        self.ord == other.ord
    }
}
impl Eq for BytesKey {}
impl PartialOrd for BytesKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for BytesKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ord.cmp(&other.ord)
    }
}

/// The typed key of a writable index. Single-column indexes over fixed
/// primitives use the native type; everything else falls back to
/// schema-ordered bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexKey {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(TotalF32),
    F64(TotalF64),
    Bytes(BytesKey),
}

impl IndexKey {
    /// Build the typed key from a projected key row.
    pub fn from_bytes(schema: &Schema, key: &[u8]) -> Result<Self> {
        use ColumnType::*;
        if schema.column_num() == 1 {
            let ty = schema.column_type(0);
            let want = ty.intrinsic_len() as usize;
            let fits = want != 0 && key.len() == want;
            match ty {
                Uint08 if fits => return Ok(IndexKey::U8(key[0])),
                Sint08 if fits => return Ok(IndexKey::I8(key[0] as i8)),
                Uint16 if fits => {
                    return Ok(IndexKey::U16(u16::from_le_bytes(key.try_into().unwrap())))
                }
                Sint16 if fits => {
                    return Ok(IndexKey::I16(i16::from_le_bytes(key.try_into().unwrap())))
                }
                Uint32 if fits => {
                    return Ok(IndexKey::U32(u32::from_le_bytes(key.try_into().unwrap())))
                }
                Sint32 if fits => {
                    return Ok(IndexKey::I32(i32::from_le_bytes(key.try_into().unwrap())))
                }
                Uint64 if fits => {
                    return Ok(IndexKey::U64(u64::from_le_bytes(key.try_into().unwrap())))
                }
                Sint64 if fits => {
                    return Ok(IndexKey::I64(i64::from_le_bytes(key.try_into().unwrap())))
                }
                Float32 if fits => {
                    return Ok(IndexKey::F32(TotalF32(f32::from_le_bytes(
                        key.try_into().unwrap(),
                    ))))
                }
                Float64 if fits => {
                    return Ok(IndexKey::F64(TotalF64(f64::from_le_bytes(
                        key.try_into().unwrap(),
                    ))))
                }
                Uint08 | Sint08 | Uint16 | Sint16 | Uint32 | Sint32 | Uint64 | Sint64
                | Float32 | Float64 => {
                    return Err(Error::RowParse(format!(
                        "key of {} bytes does not fit column type '{}'",
                        key.len(),
                        ty.as_str()
                    )))
                }
                _ => {}
            }
        }
        if schema.can_lex_convert() && schema.need_lex_convert() {
            let mut ord = key.to_vec();
            schema.byte_lex_convert(&mut ord)?;
            Ok(IndexKey::Bytes(BytesKey {
                ord,
                raw: Some(key.to_vec()),
            }))
        } else {
            Ok(IndexKey::Bytes(BytesKey {
                ord: key.to_vec(),
                raw: None,
            }))
        }
    }

    /// The projected key row this key was built from.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            IndexKey::U8(v) => vec![*v],
            IndexKey::I8(v) => vec![*v as u8],
            IndexKey::U16(v) => v.to_le_bytes().to_vec(),
            IndexKey::I16(v) => v.to_le_bytes().to_vec(),
            IndexKey::U32(v) => v.to_le_bytes().to_vec(),
            IndexKey::I32(v) => v.to_le_bytes().to_vec(),
            IndexKey::U64(v) => v.to_le_bytes().to_vec(),
            IndexKey::I64(v) => v.to_le_bytes().to_vec(),
            IndexKey::F32(v) => v.0.to_le_bytes().to_vec(),
            IndexKey::F64(v) => v.0.to_le_bytes().to_vec(),
            IndexKey::Bytes(b) => b.raw().to_vec(),
        }
    }

    /// Heap bytes beyond the enum itself; feeds the storage estimate.
    pub fn heap_len(&self) -> u64 {
        match self {
            IndexKey::Bytes(b) => {
                (b.ord.len() + b.raw.as_ref().map_or(0, |r| r.len())) as u64
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, Schema};

    fn single(ty: ColumnType) -> Schema {
        let mut s = Schema::new("k");
        s.add_column("k", ColumnMeta::new(ty)).unwrap();
        s.compile(None).unwrap();
        s
    }

    #[test]
    fn test_primitive_key_roundtrip() {
        let s = single(ColumnType::Sint32);
        let key = IndexKey::from_bytes(&s, &(-7i32).to_le_bytes()).unwrap();
        assert_eq!(key, IndexKey::I32(-7));
        assert_eq!(key.to_bytes(), (-7i32).to_le_bytes());
    }

    #[test]
    fn test_primitive_key_order() {
        let s = single(ColumnType::Sint64);
        let a = IndexKey::from_bytes(&s, &(-5i64).to_le_bytes()).unwrap();
        let b = IndexKey::from_bytes(&s, &3i64.to_le_bytes()).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_float_key_total_order() {
        let s = single(ColumnType::Float64);
        let neg = IndexKey::from_bytes(&s, &(-1.0f64).to_le_bytes()).unwrap();
        let zero = IndexKey::from_bytes(&s, &0.0f64.to_le_bytes()).unwrap();
        let nan = IndexKey::from_bytes(&s, &f64::NAN.to_le_bytes()).unwrap();
        assert!(neg < zero);
        assert!(zero < nan);
        assert_eq!(nan, nan.clone());
    }

    #[test]
    fn test_composite_key_lex_order() {
        // two-column key: ordering must follow compare_data, which the
        // lex-converted `ord` bytes reproduce
        let mut s = Schema::new("k");
        s.add_column("a", ColumnMeta::new(ColumnType::Sint32)).unwrap();
        s.add_column("b", ColumnMeta::new(ColumnType::Uint16)).unwrap();
        s.compile(None).unwrap();

        let enc = |a: i32, b: u16| {
            let mut v = a.to_le_bytes().to_vec();
            v.extend_from_slice(&b.to_le_bytes());
            v
        };
        let k1 = IndexKey::from_bytes(&s, &enc(-1, 9)).unwrap();
        let k2 = IndexKey::from_bytes(&s, &enc(0, 0)).unwrap();
        let k3 = IndexKey::from_bytes(&s, &enc(0, 1)).unwrap();
        assert!(k1 < k2);
        assert!(k2 < k3);
        // raw projected bytes come back unchanged
        assert_eq!(k1.to_bytes(), enc(-1, 9));
    }

    #[test]
    fn test_wrong_width_rejected() {
        let s = single(ColumnType::Uint64);
        assert!(IndexKey::from_bytes(&s, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_string_key_raw_bytes() {
        let s = single(ColumnType::StrUtf8);
        let key = IndexKey::from_bytes(&s, b"orchid").unwrap();
        assert_eq!(key.to_bytes(), b"orchid");
        let other = IndexKey::from_bytes(&s, b"pansy").unwrap();
        assert!(key < other);
    }
}
