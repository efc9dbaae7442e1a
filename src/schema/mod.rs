//! Declarative column schemas and the row codec.
//!
//! A [`Schema`] is an ordered set of typed columns compiled once into the
//! routines the engine runs hot: splitting a packed row into column
//! slices, packing column values back into a row, projecting index keys,
//! and comparing encoded rows. Packed rows concatenate column encodings
//! with no framing beyond what each column type requires; the last
//! variable-length column of a schema drops its length prefix or
//! terminator because its extent can be recovered from the row length.

pub mod config;
pub mod lex;

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Column type tags. All multi-byte numbers are little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Self-describing: the first data byte carries the concrete type.
    Any,
    /// Opaque recursive value, var-uint length prefixed.
    Nested,
    Uint08,
    Sint08,
    Uint16,
    Sint16,
    Uint32,
    Sint32,
    Uint64,
    Sint64,
    Uint128,
    Sint128,
    Float32,
    Float64,
    Float128,
    Decimal128,
    /// 16 bytes (128 bits) binary.
    Uuid,
    /// Fixed length binary; the length lives in ColumnMeta.
    Fixed,
    VarSint,
    VarUint,
    /// Zero terminated string. Embedded NUL is rejected at combine time.
    StrZero,
    /// Two zero terminated runs, e.g. a pattern/options pair.
    TwoStrZero,
    /// Prefixed by length (var-uint) in bytes.
    Binary,
    /// Cardinal binary, prefixed by u32 length.
    CarBin,
    /// UTF-8 text, var-uint length prefixed.
    StrUtf8,
}

impl ColumnType {
    /// Intrinsic fixed width in bytes, or 0 for variable-length types.
    /// `Fixed` reports 0 here; its width comes from the column meta.
    pub fn intrinsic_len(self) -> u32 {
        use ColumnType::*;
        match self {
            Uint08 | Sint08 => 1,
            Uint16 | Sint16 => 2,
            Uint32 | Sint32 | Float32 => 4,
            Uint64 | Sint64 | Float64 => 8,
            Uint128 | Sint128 | Float128 | Decimal128 | Uuid => 16,
            _ => 0,
        }
    }

    pub fn is_integer(self) -> bool {
        use ColumnType::*;
        matches!(
            self,
            Uint08
                | Sint08
                | Uint16
                | Sint16
                | Uint32
                | Sint32
                | Uint64
                | Sint64
                | Uint128
                | Sint128
                | VarSint
                | VarUint
        )
    }

    pub fn is_number(self) -> bool {
        use ColumnType::*;
        self.is_integer() || matches!(self, Float32 | Float64 | Float128 | Decimal128)
    }

    pub fn is_string(self) -> bool {
        use ColumnType::*;
        matches!(self, StrZero | TwoStrZero | StrUtf8)
    }

    /// The type carries a length prefix or terminator that the terminal
    /// variable-length column of a row omits.
    fn has_framing(self) -> bool {
        use ColumnType::*;
        matches!(self, StrZero | TwoStrZero | Binary | CarBin | StrUtf8 | Nested)
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        use ColumnType::*;
        let ty = match s {
            "any" => Any,
            "nested" => Nested,
            "uint08" | "uint8" => Uint08,
            "sint08" | "int8" => Sint08,
            "uint16" => Uint16,
            "sint16" | "int16" => Sint16,
            "uint32" => Uint32,
            "sint32" | "int32" => Sint32,
            "uint64" => Uint64,
            "sint64" | "int64" => Sint64,
            "uint128" => Uint128,
            "sint128" | "int128" => Sint128,
            "float32" | "float" => Float32,
            "float64" | "double" => Float64,
            "float128" => Float128,
            "decimal128" => Decimal128,
            "uuid" => Uuid,
            "fixed" => Fixed,
            "varsint" => VarSint,
            "varuint" => VarUint,
            "strzero" => StrZero,
            "twostrzero" => TwoStrZero,
            "binary" => Binary,
            "carbin" => CarBin,
            "strutf8" | "str" | "string" => StrUtf8,
            other => {
                return Err(Error::InvalidSchema(format!(
                    "unknown column type '{other}'"
                )))
            }
        };
        Ok(ty)
    }

    pub fn as_str(self) -> &'static str {
        use ColumnType::*;
        match self {
            Any => "any",
            Nested => "nested",
            Uint08 => "uint08",
            Sint08 => "sint08",
            Uint16 => "uint16",
            Sint16 => "sint16",
            Uint32 => "uint32",
            Sint32 => "sint32",
            Uint64 => "uint64",
            Sint64 => "sint64",
            Uint128 => "uint128",
            Sint128 => "sint128",
            Float32 => "float32",
            Float64 => "float64",
            Float128 => "float128",
            Decimal128 => "decimal128",
            Uuid => "uuid",
            Fixed => "fixed",
            VarSint => "varsint",
            VarUint => "varuint",
            StrZero => "strzero",
            TwoStrZero => "twostrzero",
            Binary => "binary",
            CarBin => "carbin",
            StrUtf8 => "strutf8",
        }
    }
}

/// Per-column metadata: type, fixed width, and the cached offset of the
/// column within the leading fixed prefix of a row.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMeta {
    pub col_type: ColumnType,
    pub fixed_len: u32,
    pub fixed_offset: u32,
}

impl ColumnMeta {
    pub fn new(col_type: ColumnType) -> Self {
        Self {
            col_type,
            fixed_len: col_type.intrinsic_len(),
            fixed_offset: 0,
        }
    }

    /// Fixed-length binary of the given width.
    pub fn fixed(len: u32) -> Self {
        Self {
            col_type: ColumnType::Fixed,
            fixed_len: len,
            fixed_offset: 0,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_len != 0
    }
}

/// One parsed column: a `(pos, len)` slice over the row buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColSlice {
    pub pos: u32,
    pub len: u32,
}

/// Parsed view of a packed row: slices over the caller's row buffer,
/// no copies.
#[derive(Debug, Clone, Default)]
pub struct ColumnVec {
    pub cols: Vec<ColSlice>,
}

impl ColumnVec {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            cols: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn clear(&mut self) {
        self.cols.clear();
    }

    /// The idx'th column value within `base` (the buffer the row was
    /// parsed from).
    pub fn col<'a>(&self, base: &'a [u8], idx: usize) -> &'a [u8] {
        let e = self.cols[idx];
        &base[e.pos as usize..(e.pos + e.len) as usize]
    }
}

/// Read a var-uint (LEB128). Returns the value and the encoded length.
pub fn read_var_uint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Append a var-uint (LEB128) and return the encoded length.
pub fn write_var_uint(out: &mut Vec<u8>, mut value: u64) -> usize {
    let mut n = 0;
    loop {
        let b = (value & 0x7f) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            out.push(b);
            return n;
        }
        out.push(b | 0x80);
    }
}

/// Zig-zag signed varint.
pub fn read_var_sint(buf: &[u8]) -> Option<(i64, usize)> {
    let (z, n) = read_var_uint(buf)?;
    Some((((z >> 1) as i64) ^ -((z & 1) as i64), n))
}

pub fn write_var_sint(out: &mut Vec<u8>, value: i64) -> usize {
    write_var_uint(out, ((value << 1) ^ (value >> 63)) as u64)
}

/// An ordered, named column set compiled into codec routines.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub name: String,
    columns: Vec<(String, ColumnMeta)>,
    by_name: HashMap<String, usize>,

    // filled by compile()
    fixed_row_len: usize,
    /// One past the index of the last framed variable-length column whose
    /// prefix/terminator is omitted, or 0 when no omission applies.
    last_var_len_col: usize,
    /// Sum of fixed widths of the columns after the omitted one.
    rest_fix_len_sum: usize,
    need_lex_convert: bool,
    can_lex_convert: bool,
    proj: Vec<usize>,
    is_compiled: bool,

    // index-schema flags
    pub is_ordered: bool,
    pub is_unique: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_column(&mut self, name: &str, meta: ColumnMeta) -> Result<()> {
        if self.is_compiled {
            return Err(Error::InvalidSchema(format!(
                "schema '{}' is already compiled",
                self.name
            )));
        }
        if self.by_name.contains_key(name) {
            return Err(Error::InvalidSchema(format!(
                "duplicate column name '{name}'"
            )));
        }
        if meta.col_type == ColumnType::Fixed && meta.fixed_len == 0 {
            return Err(Error::InvalidSchema(format!(
                "fixed column '{name}' must declare a non-zero length"
            )));
        }
        self.by_name.insert(name.to_string(), self.columns.len());
        self.columns.push((name.to_string(), meta));
        Ok(())
    }

    pub fn column_num(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, id: usize) -> &str {
        &self.columns[id].0
    }

    pub fn column_id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn column_meta(&self, id: usize) -> &ColumnMeta {
        &self.columns[id].1
    }

    pub fn column_type(&self, id: usize) -> ColumnType {
        self.columns[id].1.col_type
    }

    /// Non-zero iff every column has a fixed width; parsing is then O(1)
    /// per column via the precomputed offsets.
    pub fn fixed_row_len(&self) -> usize {
        self.fixed_row_len
    }

    pub fn is_compiled(&self) -> bool {
        self.is_compiled
    }

    pub fn need_lex_convert(&self) -> bool {
        self.need_lex_convert
    }

    pub fn can_lex_convert(&self) -> bool {
        self.can_lex_convert
    }

    pub fn parent_column_id(&self, my_column_id: usize) -> usize {
        self.proj[my_column_id]
    }

    pub fn join_column_names(&self, delim: char) -> String {
        let names: Vec<&str> = self.columns.iter().map(|(n, _)| n.as_str()).collect();
        names.join(&delim.to_string())
    }

    /// Compile offsets, row-length and encoding flags, and resolve the
    /// projection against `parent`. Idempotent.
    pub fn compile(&mut self, parent: Option<&Schema>) -> Result<()> {
        if self.is_compiled {
            return Ok(());
        }
        if self.columns.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "schema '{}' has no columns",
                self.name
            )));
        }

        // Offsets within the leading fixed prefix.
        let mut running = 0u32;
        let mut all_fixed = true;
        for (_, meta) in self.columns.iter_mut() {
            if all_fixed {
                meta.fixed_offset = running;
                if meta.is_fixed() {
                    running += meta.fixed_len;
                } else {
                    all_fixed = false;
                }
            } else {
                meta.fixed_offset = 0;
            }
        }
        self.fixed_row_len = if all_fixed { running as usize } else { 0 };

        self.compute_last_var_len_col();
        self.compute_lex_flags();
        self.compile_project(parent)?;

        self.is_compiled = true;
        Ok(())
    }

    fn compute_last_var_len_col(&mut self) {
        self.last_var_len_col = 0;
        self.rest_fix_len_sum = 0;
        let last_var = self
            .columns
            .iter()
            .rposition(|(_, m)| !m.is_fixed());
        if let Some(idx) = last_var {
            let (_, meta) = &self.columns[idx];
            // Only framed types can drop their framing; everything after
            // the omitted column must be fixed so its extent is
            // recoverable from the row length.
            if meta.col_type.has_framing() {
                self.last_var_len_col = idx + 1;
                self.rest_fix_len_sum = self.columns[idx + 1..]
                    .iter()
                    .map(|(_, m)| m.fixed_len as usize)
                    .sum();
            }
        }
    }

    fn compute_lex_flags(&mut self) {
        use ColumnType::*;
        let colnum = self.columns.len();
        let mut can = true;
        let mut need = false;
        for (idx, (_, meta)) in self.columns.iter().enumerate() {
            let terminal = idx + 1 == colnum;
            match meta.col_type {
                Uint08 | Uuid | Fixed => {}
                Sint08 | Uint16 | Sint16 | Uint32 | Sint32 | Uint64 | Sint64 | Uint128
                | Sint128 | Float32 | Float64 | Float128 | Decimal128 => need = true,
                // The terminator keeps raw bytes order-correct, except
                // when it is omitted and fixed columns follow.
                StrZero => {
                    if idx + 1 == self.last_var_len_col && self.rest_fix_len_sum > 0 {
                        can = false;
                    }
                }
                // Prefix-framed values only compare bytewise when the
                // prefix is omitted, i.e. in terminal position.
                StrUtf8 | Binary | CarBin if terminal => {}
                _ => can = false,
            }
        }
        self.can_lex_convert = can;
        self.need_lex_convert = need;
    }

    fn compile_project(&mut self, parent: Option<&Schema>) -> Result<()> {
        self.proj.clear();
        match parent {
            None => self.proj.extend(0..self.columns.len()),
            Some(parent) => {
                for (name, _) in &self.columns {
                    let pid = parent.column_id(name).ok_or_else(|| {
                        Error::InvalidSchema(format!(
                            "column '{name}' of schema '{}' not found in parent '{}'",
                            self.name, parent.name
                        ))
                    })?;
                    self.proj.push(pid);
                }
            }
        }
        Ok(())
    }

    /// Value extent of the column at `pos`. Returns
    /// `(value_pos, value_len, next_pos)`.
    fn col_extent(
        &self,
        meta: &ColumnMeta,
        row: &[u8],
        pos: usize,
        omit_framing: bool,
    ) -> Result<(usize, usize, usize)> {
        use ColumnType::*;
        let remain = row.len().checked_sub(pos).ok_or_else(|| {
            Error::RowParse(format!("column offset {pos} beyond row length {}", row.len()))
        })?;

        if meta.is_fixed() {
            let n = meta.fixed_len as usize;
            if remain < n {
                return Err(Error::RowParse(format!(
                    "fixed column needs {n} bytes, {remain} remain"
                )));
            }
            return Ok((pos, n, pos + n));
        }

        match meta.col_type {
            VarUint | VarSint => {
                let (_, n) = read_var_uint(&row[pos..])
                    .ok_or_else(|| Error::RowParse("truncated varint".into()))?;
                // the varint bytes themselves are the column value
                Ok((pos, n, pos + n))
            }
            StrZero => {
                if omit_framing {
                    let n = remain
                        .checked_sub(self.rest_fix_len_sum)
                        .ok_or_else(|| Error::RowParse("row too short for tail columns".into()))?;
                    Ok((pos, n, pos + n))
                } else {
                    let n = row[pos..]
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| Error::RowParse("unterminated strzero".into()))?;
                    Ok((pos, n, pos + n + 1))
                }
            }
            TwoStrZero => {
                let first = row[pos..]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| Error::RowParse("unterminated twostrzero".into()))?;
                if omit_framing {
                    let n = remain
                        .checked_sub(self.rest_fix_len_sum)
                        .ok_or_else(|| Error::RowParse("row too short for tail columns".into()))?;
                    if first >= n {
                        return Err(Error::RowParse("twostrzero missing separator".into()));
                    }
                    Ok((pos, n, pos + n))
                } else {
                    let second = row[pos + first + 1..]
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| Error::RowParse("unterminated twostrzero".into()))?;
                    let n = first + 1 + second;
                    Ok((pos, n, pos + n + 1))
                }
            }
            Binary | StrUtf8 | Nested => {
                if omit_framing {
                    let n = remain
                        .checked_sub(self.rest_fix_len_sum)
                        .ok_or_else(|| Error::RowParse("row too short for tail columns".into()))?;
                    Ok((pos, n, pos + n))
                } else {
                    let (len, pfx) = read_var_uint(&row[pos..])
                        .ok_or_else(|| Error::RowParse("truncated length prefix".into()))?;
                    let len = len as usize;
                    if remain < pfx + len {
                        return Err(Error::RowParse(format!(
                            "length prefix {len} overruns row ({} bytes remain)",
                            remain - pfx
                        )));
                    }
                    Ok((pos + pfx, len, pos + pfx + len))
                }
            }
            CarBin => {
                if omit_framing {
                    let n = remain
                        .checked_sub(self.rest_fix_len_sum)
                        .ok_or_else(|| Error::RowParse("row too short for tail columns".into()))?;
                    Ok((pos, n, pos + n))
                } else {
                    if remain < 4 {
                        return Err(Error::RowParse("truncated carbin prefix".into()));
                    }
                    let len = u32::from_le_bytes(row[pos..pos + 4].try_into().unwrap()) as usize;
                    if remain < 4 + len {
                        return Err(Error::RowParse(format!(
                            "carbin prefix {len} overruns row ({} bytes remain)",
                            remain - 4
                        )));
                    }
                    Ok((pos + 4, len, pos + 4 + len))
                }
            }
            Any => {
                if remain < 1 {
                    return Err(Error::RowParse("truncated any tag".into()));
                }
                let tag = any_tag_type(row[pos])?;
                if tag == Any || tag == Nested {
                    return Err(Error::RowParse("nested 'any' value".into()));
                }
                let inner = ColumnMeta::new(tag);
                let (_, _, next) = self.col_extent(&inner, row, pos + 1, false)?;
                // the value is self-describing: tag byte plus payload
                Ok((pos, next - pos, next))
            }
            _ => unreachable!("fixed types handled above"),
        }
    }

    /// Split a packed row into `(pos, len)` slices. No copies.
    pub fn parse_row(&self, row: &[u8]) -> Result<ColumnVec> {
        let mut cols = ColumnVec::with_capacity(self.columns.len());
        self.parse_row_append(row, 0, &mut cols)?;
        Ok(cols)
    }

    /// Parse starting at `start`, appending slices to `cols`.
    pub fn parse_row_append(&self, row: &[u8], start: usize, cols: &mut ColumnVec) -> Result<()> {
        debug_assert!(self.is_compiled);
        let mut pos = start;
        for (idx, (_, meta)) in self.columns.iter().enumerate() {
            let omit = idx + 1 == self.last_var_len_col;
            let (vpos, vlen, next) = self.col_extent(meta, row, pos, omit)?;
            cols.cols.push(ColSlice {
                pos: vpos as u32,
                len: vlen as u32,
            });
            pos = next;
        }
        if pos != row.len() {
            return Err(Error::RowParse(format!(
                "{} trailing bytes after last column",
                row.len() - pos
            )));
        }
        Ok(())
    }

    /// Append one column's encoded form, framing included.
    pub fn project_to_norm(&self, col: &[u8], column_id: usize, out: &mut Vec<u8>) -> Result<()> {
        self.encode_col(col, column_id, false, out)
    }

    /// As [`project_to_norm`](Self::project_to_norm) but drops the
    /// framing; used for the terminal variable-length column.
    pub fn project_to_last(&self, col: &[u8], column_id: usize, out: &mut Vec<u8>) -> Result<()> {
        let omit = column_id + 1 == self.last_var_len_col;
        self.encode_col(col, column_id, omit, out)
    }

    fn encode_col(
        &self,
        col: &[u8],
        column_id: usize,
        omit_framing: bool,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        use ColumnType::*;
        let meta = &self.columns[column_id].1;
        if meta.is_fixed() {
            if col.len() != meta.fixed_len as usize {
                return Err(Error::RowParse(format!(
                    "column '{}' expects {} bytes, got {}",
                    self.columns[column_id].0,
                    meta.fixed_len,
                    col.len()
                )));
            }
            out.extend_from_slice(col);
            return Ok(());
        }
        match meta.col_type {
            VarUint | VarSint => {
                match read_var_uint(col) {
                    Some((_, n)) if n == col.len() => {}
                    _ => {
                        return Err(Error::RowParse(format!(
                            "column '{}' is not a well-formed varint",
                            self.columns[column_id].0
                        )))
                    }
                }
                out.extend_from_slice(col);
            }
            StrZero => {
                if col.contains(&0) {
                    return Err(Error::RowParse(format!(
                        "embedded NUL in strzero column '{}'",
                        self.columns[column_id].0
                    )));
                }
                out.extend_from_slice(col);
                if !omit_framing {
                    out.push(0);
                }
            }
            TwoStrZero => {
                if col.iter().filter(|&&b| b == 0).count() != 1 {
                    return Err(Error::RowParse(format!(
                        "twostrzero column '{}' must contain exactly one separator",
                        self.columns[column_id].0
                    )));
                }
                out.extend_from_slice(col);
                if !omit_framing {
                    out.push(0);
                }
            }
            Binary | StrUtf8 | Nested => {
                if !omit_framing {
                    write_var_uint(out, col.len() as u64);
                }
                out.extend_from_slice(col);
            }
            CarBin => {
                if !omit_framing {
                    out.extend_from_slice(&(col.len() as u32).to_le_bytes());
                }
                out.extend_from_slice(col);
            }
            Any => {
                if col.is_empty() {
                    return Err(Error::RowParse("empty 'any' value".into()));
                }
                any_tag_type(col[0])?;
                out.extend_from_slice(col);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Pack column values into a row. `base` is the buffer `cols` slices
    /// into (typically the buffer the row was parsed from).
    pub fn combine_row(&self, base: &[u8], cols: &ColumnVec) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.combine_row_append(base, cols, &mut out)?;
        Ok(out)
    }

    pub fn combine_row_append(
        &self,
        base: &[u8],
        cols: &ColumnVec,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if cols.len() != self.columns.len() {
            return Err(Error::RowParse(format!(
                "schema '{}' has {} columns, got {}",
                self.name,
                self.columns.len(),
                cols.len()
            )));
        }
        for idx in 0..cols.len() {
            self.project_to_last(cols.col(base, idx), idx, out)?;
        }
        Ok(())
    }

    /// Pack owned column values into a row.
    pub fn combine_cols(&self, cols: &[&[u8]]) -> Result<Vec<u8>> {
        if cols.len() != self.columns.len() {
            return Err(Error::RowParse(format!(
                "schema '{}' has {} columns, got {}",
                self.name,
                self.columns.len(),
                cols.len()
            )));
        }
        let mut out = Vec::new();
        for (idx, col) in cols.iter().enumerate() {
            self.project_to_last(col, idx, &mut out)?;
        }
        Ok(out)
    }

    /// Build this schema's packed row from a parent row's parsed view,
    /// applying the projection.
    pub fn select_parent_row(&self, parent_base: &[u8], parent_cols: &ColumnVec) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.select_parent_row_append(parent_base, parent_cols, &mut out)?;
        Ok(out)
    }

    pub fn select_parent_row_append(
        &self,
        parent_base: &[u8],
        parent_cols: &ColumnVec,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        debug_assert_eq!(self.proj.len(), self.columns.len());
        for (idx, &pid) in self.proj.iter().enumerate() {
            if pid >= parent_cols.len() {
                return Err(Error::RowParse(format!(
                    "projection column {pid} out of range ({} parent columns)",
                    parent_cols.len()
                )));
            }
            self.project_to_last(parent_cols.col(parent_base, pid), idx, out)?;
        }
        Ok(())
    }

    /// This schema's column view over the parent's buffer.
    pub fn select_parent_cols(&self, parent_cols: &ColumnVec) -> Result<ColumnVec> {
        let mut cols = ColumnVec::with_capacity(self.columns.len());
        for &pid in &self.proj {
            if pid >= parent_cols.len() {
                return Err(Error::RowParse(format!(
                    "projection column {pid} out of range ({} parent columns)",
                    parent_cols.len()
                )));
            }
            cols.cols.push(parent_cols.cols[pid]);
        }
        Ok(cols)
    }

    /// Total order over encoded rows, consistent with the column types.
    /// Truncated or malformed input sorts before well-formed input, which
    /// keeps the order total for the empty placeholder rows of logically
    /// deleted slots.
    pub fn compare_data(&self, x: &[u8], y: &[u8]) -> Ordering {
        match (self.parse_row(x), self.parse_row(y)) {
            (Ok(xc), Ok(yc)) => {
                for idx in 0..self.columns.len() {
                    let ord = compare_col(
                        self.columns[idx].1.col_type,
                        xc.col(x, idx),
                        yc.col(y, idx),
                    );
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            (Err(_), Ok(_)) => Ordering::Less,
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        }
    }

    /// Parse one `delim`-separated text line into a packed row using
    /// type-directed tokenization. The final column swallows the rest of
    /// the line.
    pub fn parse_delim_text(&self, delim: char, text: &str) -> Result<Vec<u8>> {
        let colnum = self.columns.len();
        let mut tokens: Vec<&str> = text.splitn(colnum, delim).collect();
        if tokens.len() != colnum {
            return Err(Error::RowParse(format!(
                "expected {colnum} fields, got {}",
                tokens.len()
            )));
        }
        let mut out = Vec::new();
        let mut scratch: Vec<u8>;
        for (idx, token) in tokens.drain(..).enumerate() {
            use ColumnType::*;
            let meta = &self.columns[idx].1;
            let value: &[u8] = match meta.col_type {
                Uint08 => {
                    scratch = parse_int::<u8>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Sint08 => {
                    scratch = parse_int::<i8>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Uint16 => {
                    scratch = parse_int::<u16>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Sint16 => {
                    scratch = parse_int::<i16>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Uint32 => {
                    scratch = parse_int::<u32>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Sint32 => {
                    scratch = parse_int::<i32>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Uint64 => {
                    scratch = parse_int::<u64>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Sint64 => {
                    scratch = parse_int::<i64>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Uint128 => {
                    scratch = parse_int::<u128>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Sint128 | Decimal128 => {
                    scratch = parse_int::<i128>(token)?.to_le_bytes().to_vec();
                    &scratch
                }
                Float32 => {
                    let v: f32 = token
                        .parse()
                        .map_err(|_| Error::RowParse(format!("bad float '{token}'")))?;
                    scratch = v.to_le_bytes().to_vec();
                    &scratch
                }
                Float64 => {
                    let v: f64 = token
                        .parse()
                        .map_err(|_| Error::RowParse(format!("bad float '{token}'")))?;
                    scratch = v.to_le_bytes().to_vec();
                    &scratch
                }
                Uuid | Float128 => {
                    scratch = parse_hex_bytes(token, 16)?;
                    &scratch
                }
                Fixed => {
                    if token.len() != meta.fixed_len as usize {
                        return Err(Error::RowParse(format!(
                            "fixed column expects {} bytes, got {}",
                            meta.fixed_len,
                            token.len()
                        )));
                    }
                    token.as_bytes()
                }
                VarUint => {
                    let v = parse_int::<u64>(token)?;
                    scratch = Vec::new();
                    write_var_uint(&mut scratch, v);
                    &scratch
                }
                VarSint => {
                    let v = parse_int::<i64>(token)?;
                    scratch = Vec::new();
                    write_var_sint(&mut scratch, v);
                    &scratch
                }
                StrZero | StrUtf8 | Binary | CarBin => token.as_bytes(),
                TwoStrZero => {
                    scratch = token.as_bytes().to_vec();
                    if !scratch.contains(&0) {
                        scratch.push(0);
                    }
                    &scratch
                }
                Any | Nested => {
                    return Err(Error::RowParse(format!(
                        "column type '{}' is not parseable from delimited text",
                        meta.col_type.as_str()
                    )))
                }
            };
            self.project_to_last(value, idx, &mut out)?;
        }
        Ok(out)
    }

    /// Human-readable JSON rendering of a packed row.
    pub fn to_json_str(&self, row: &[u8]) -> Result<String> {
        use ColumnType::*;
        let cols = self.parse_row(row)?;
        let mut map = serde_json::Map::new();
        for idx in 0..self.columns.len() {
            let (name, meta) = &self.columns[idx];
            let v = cols.col(row, idx);
            let json = match meta.col_type {
                Uint08 => serde_json::json!(v[0]),
                Sint08 => serde_json::json!(v[0] as i8),
                Uint16 => serde_json::json!(u16::from_le_bytes(v.try_into().unwrap())),
                Sint16 => serde_json::json!(i16::from_le_bytes(v.try_into().unwrap())),
                Uint32 => serde_json::json!(u32::from_le_bytes(v.try_into().unwrap())),
                Sint32 => serde_json::json!(i32::from_le_bytes(v.try_into().unwrap())),
                Uint64 => serde_json::json!(u64::from_le_bytes(v.try_into().unwrap())),
                Sint64 => serde_json::json!(i64::from_le_bytes(v.try_into().unwrap())),
                Uint128 => serde_json::json!(
                    u128::from_le_bytes(v.try_into().unwrap()).to_string()
                ),
                Sint128 | Decimal128 => serde_json::json!(
                    i128::from_le_bytes(v.try_into().unwrap()).to_string()
                ),
                Float32 => serde_json::json!(f32::from_le_bytes(v.try_into().unwrap())),
                Float64 => serde_json::json!(f64::from_le_bytes(v.try_into().unwrap())),
                VarUint => serde_json::json!(read_var_uint(v).map(|(x, _)| x)),
                VarSint => serde_json::json!(read_var_sint(v).map(|(x, _)| x)),
                StrZero | StrUtf8 => serde_json::json!(String::from_utf8_lossy(v)),
                TwoStrZero => {
                    let sep = v.iter().position(|&b| b == 0).unwrap_or(v.len());
                    serde_json::json!([
                        String::from_utf8_lossy(&v[..sep]),
                        String::from_utf8_lossy(&v[(sep + 1).min(v.len())..])
                    ])
                }
                Uuid | Float128 | Fixed | Binary | CarBin | Nested | Any => {
                    serde_json::json!(hex_string(v))
                }
            };
            map.insert(name.clone(), json);
        }
        Ok(serde_json::Value::Object(map).to_string())
    }
}

fn any_tag_type(tag: u8) -> Result<ColumnType> {
    use ColumnType::*;
    let ty = match tag {
        0 => Any,
        1 => Nested,
        2 => Uint08,
        3 => Sint08,
        4 => Uint16,
        5 => Sint16,
        6 => Uint32,
        7 => Sint32,
        8 => Uint64,
        9 => Sint64,
        10 => Uint128,
        11 => Sint128,
        12 => Float32,
        13 => Float64,
        14 => Float128,
        15 => Decimal128,
        16 => Uuid,
        18 => VarSint,
        19 => VarUint,
        20 => StrZero,
        22 => Binary,
        23 => CarBin,
        24 => StrUtf8,
        other => {
            return Err(Error::RowParse(format!(
                "unknown 'any' type tag {other}"
            )))
        }
    };
    Ok(ty)
}

fn compare_col(ty: ColumnType, x: &[u8], y: &[u8]) -> Ordering {
    use ColumnType::*;
    match ty {
        Uint08 | Uint16 | Uint32 | Uint64 | Uint128 => le_uint(x).cmp(&le_uint(y)),
        Sint08 | Sint16 | Sint32 | Sint64 | Sint128 | Decimal128 => {
            le_sint(x).cmp(&le_sint(y))
        }
        Float32 => {
            let xf = f32::from_le_bytes(x.try_into().unwrap());
            let yf = f32::from_le_bytes(y.try_into().unwrap());
            xf.total_cmp(&yf)
        }
        Float64 => {
            let xf = f64::from_le_bytes(x.try_into().unwrap());
            let yf = f64::from_le_bytes(y.try_into().unwrap());
            xf.total_cmp(&yf)
        }
        Float128 => lex::f128_order_key(x).cmp(&lex::f128_order_key(y)),
        VarUint => {
            let xv = read_var_uint(x).map(|(v, _)| v);
            let yv = read_var_uint(y).map(|(v, _)| v);
            xv.cmp(&yv)
        }
        VarSint => {
            let xv = read_var_sint(x).map(|(v, _)| v);
            let yv = read_var_sint(y).map(|(v, _)| v);
            xv.cmp(&yv)
        }
        Any => {
            if x.is_empty() || y.is_empty() {
                return x.len().cmp(&y.len());
            }
            match x[0].cmp(&y[0]) {
                Ordering::Equal => match any_tag_type(x[0]) {
                    Ok(inner) => compare_col(inner, &x[1..], &y[1..]),
                    Err(_) => x.cmp(y),
                },
                ord => ord,
            }
        }
        _ => x.cmp(y),
    }
}

fn le_uint(v: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf[..v.len()].copy_from_slice(v);
    u128::from_le_bytes(buf)
}

fn le_sint(v: &[u8]) -> i128 {
    let mut buf = [0u8; 16];
    buf[..v.len()].copy_from_slice(v);
    let raw = i128::from_le_bytes(buf);
    // sign-extend from the value width
    let shift = 128 - 8 * v.len() as u32;
    (raw << shift) >> shift
}

fn parse_int<T: std::str::FromStr>(token: &str) -> Result<T> {
    token
        .trim()
        .parse()
        .map_err(|_| Error::RowParse(format!("bad integer '{token}'")))
}

fn parse_hex_bytes(token: &str, len: usize) -> Result<Vec<u8>> {
    let token = token.trim().replace('-', "");
    if token.len() != len * 2 {
        return Err(Error::RowParse(format!(
            "expected {} hex digits, got {}",
            len * 2,
            token.len()
        )));
    }
    (0..len)
        .map(|i| {
            u8::from_str_radix(&token[2 * i..2 * i + 2], 16)
                .map_err(|_| Error::RowParse(format!("bad hex '{token}'")))
        })
        .collect()
}

fn hex_string(v: &[u8]) -> String {
    let mut s = String::with_capacity(v.len() * 2);
    for b in v {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
