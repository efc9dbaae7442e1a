//! Immutable packed row store.
//!
//! File layout (all integers little-endian):
//!
//! ```text
//! u64 fixed_len
//! u64 row_count
//! u64 pool_size
//! if fixed_len == 0:
//!     u32 offsets[row_count + 1]
//! bytes pool[pool_size]
//! ```
//!
//! Random access is O(1) either way: fixed rows by multiplication,
//! variable rows through the offset array.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::sortvec::SortableStrVec;

#[derive(Debug)]
pub struct ReadonlyStore {
    fixed_len: usize,
    /// Empty when `fixed_len != 0`.
    offsets: Vec<u32>,
    pool: Vec<u8>,
    /// Column-group stores are only addressed by id; they refuse
    /// whole-store iteration.
    iterable: bool,
}

impl ReadonlyStore {
    /// Build a row store from bulk data in its current entry order.
    pub fn build(schema: &Schema, data: SortableStrVec) -> Result<Self> {
        Self::build_inner(schema, data, true)
    }

    /// Build a column-group store; positional get only.
    pub fn build_colgroup(schema: &Schema, data: SortableStrVec) -> Result<Self> {
        Self::build_inner(schema, data, false)
    }

    fn build_inner(schema: &Schema, data: SortableStrVec, iterable: bool) -> Result<Self> {
        let fixed_len = schema.fixed_row_len();
        if fixed_len != 0 {
            let rows = data.len() as u64;
            let (_, pool) = data.into_packed()?;
            if pool.len() as u64 != rows * fixed_len as u64 {
                return Err(Error::InvalidData(format!(
                    "fixed store pool {} bytes does not cover {} rows of {}",
                    pool.len(),
                    rows,
                    fixed_len
                )));
            }
            Ok(Self {
                fixed_len,
                offsets: Vec::new(),
                pool,
                iterable,
            })
        } else {
            let (offsets, pool) = data.into_packed()?;
            Ok(Self {
                fixed_len: 0,
                offsets,
                pool,
                iterable,
            })
        }
    }

    pub fn num_data_rows(&self) -> u64 {
        if self.fixed_len != 0 {
            (self.pool.len() / self.fixed_len) as u64
        } else {
            (self.offsets.len().saturating_sub(1)) as u64
        }
    }

    pub fn data_storage_size(&self) -> u64 {
        (self.pool.len() + self.offsets.len() * 4) as u64
    }

    pub fn get_value_append(&self, id: u64, out: &mut Vec<u8>) -> Result<()> {
        if id >= self.num_data_rows() {
            return Err(Error::NotFound);
        }
        let id = id as usize;
        if self.fixed_len != 0 {
            let start = id * self.fixed_len;
            out.extend_from_slice(&self.pool[start..start + self.fixed_len]);
        } else {
            let start = self.offsets[id] as usize;
            let end = self.offsets[id + 1] as usize;
            out.extend_from_slice(&self.pool[start..end]);
        }
        Ok(())
    }

    pub fn get_value(&self, id: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.get_value_append(id, &mut out)?;
        Ok(out)
    }

    /// Iterate rows in id order. Column-group stores refuse.
    pub fn create_store_iter(&self) -> Result<ReadonlyStoreIter<'_>> {
        if !self.iterable {
            return Err(Error::InvalidData(
                "column store is only addressable by id".into(),
            ));
        }
        Ok(ReadonlyStoreIter { store: self, id: 0 })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_u64::<LittleEndian>(self.fixed_len as u64)?;
        w.write_u64::<LittleEndian>(self.num_data_rows())?;
        w.write_u64::<LittleEndian>(self.pool.len() as u64)?;
        if self.fixed_len == 0 {
            for &off in &self.offsets {
                w.write_u32::<LittleEndian>(off)?;
            }
        }
        w.write_all(&self.pool)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::load_inner(path, true)
    }

    pub fn load_colgroup(path: &Path) -> Result<Self> {
        Self::load_inner(path, false)
    }

    fn load_inner(path: &Path, iterable: bool) -> Result<Self> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);
        let fixed_len = r.read_u64::<LittleEndian>()? as usize;
        let rows = r.read_u64::<LittleEndian>()? as usize;
        let pool_size = r.read_u64::<LittleEndian>()? as usize;
        let mut offsets = Vec::new();
        if fixed_len == 0 {
            offsets.reserve(rows + 1);
            for _ in 0..rows + 1 {
                offsets.push(r.read_u32::<LittleEndian>()?);
            }
            if offsets.last().copied() != Some(pool_size as u32) {
                return Err(Error::InvalidData(format!(
                    "store offsets end {:?} != pool size {pool_size} ({})",
                    offsets.last(),
                    path.display()
                )));
            }
        } else if pool_size != rows * fixed_len {
            return Err(Error::InvalidData(format!(
                "fixed store pool {pool_size} != {rows} rows of {fixed_len} ({})",
                path.display()
            )));
        }
        let mut pool = vec![0u8; pool_size];
        r.read_exact(&mut pool)?;
        Ok(Self {
            fixed_len,
            offsets,
            pool,
            iterable,
        })
    }
}

pub struct ReadonlyStoreIter<'a> {
    store: &'a ReadonlyStore,
    id: u64,
}

impl Iterator for ReadonlyStoreIter<'_> {
    type Item = (u64, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.id >= self.store.num_data_rows() {
            return None;
        }
        let id = self.id;
        self.id += 1;
        Some((id, self.store.get_value(id).expect("id in range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, ColumnType};
    use tempfile::TempDir;

    fn var_schema() -> Schema {
        let mut s = Schema::new("rows");
        s.add_column("name", ColumnMeta::new(ColumnType::StrUtf8)).unwrap();
        s.compile(None).unwrap();
        s
    }

    fn fixed_schema() -> Schema {
        let mut s = Schema::new("rows");
        s.add_column("id", ColumnMeta::new(ColumnType::Uint64)).unwrap();
        s.compile(None).unwrap();
        s
    }

    #[test]
    fn test_var_store_build_get() {
        let schema = var_schema();
        let mut data = SortableStrVec::new();
        data.push(b"alpha");
        data.push(b"");
        data.push(b"gamma");
        let store = ReadonlyStore::build(&schema, data).unwrap();

        assert_eq!(store.num_data_rows(), 3);
        assert_eq!(store.get_value(0).unwrap(), b"alpha");
        assert_eq!(store.get_value(1).unwrap(), b"");
        assert_eq!(store.get_value(2).unwrap(), b"gamma");
        assert!(matches!(store.get_value(3), Err(Error::NotFound)));
    }

    #[test]
    fn test_fixed_store_build_get() {
        let schema = fixed_schema();
        let mut data = SortableStrVec::new();
        for v in [10u64, 20, 30] {
            data.push(&v.to_le_bytes());
        }
        let store = ReadonlyStore::build(&schema, data).unwrap();
        assert_eq!(store.num_data_rows(), 3);
        assert_eq!(store.get_value(1).unwrap(), 20u64.to_le_bytes());
    }

    #[test]
    fn test_save_load_byte_identical() {
        let dir = TempDir::new().unwrap();
        let schema = var_schema();
        let mut data = SortableStrVec::new();
        data.push(b"one");
        data.push(b"two");
        let store = ReadonlyStore::build(&schema, data).unwrap();

        let path = dir.path().join("rows");
        store.save(&path).unwrap();
        let loaded = ReadonlyStore::load(&path).unwrap();
        assert_eq!(loaded.num_data_rows(), 2);
        assert_eq!(loaded.get_value(0).unwrap(), b"one");
        assert_eq!(loaded.get_value(1).unwrap(), b"two");

        // byte-for-byte equivalent state round-trips to the same file
        let path2 = dir.path().join("rows2");
        loaded.save(&path2).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), std::fs::read(&path2).unwrap());
    }

    #[test]
    fn test_fixed_save_load() {
        let dir = TempDir::new().unwrap();
        let schema = fixed_schema();
        let mut data = SortableStrVec::new();
        for v in [7u64, 8] {
            data.push(&v.to_le_bytes());
        }
        let store = ReadonlyStore::build(&schema, data).unwrap();
        let path = dir.path().join("rows");
        store.save(&path).unwrap();
        let loaded = ReadonlyStore::load(&path).unwrap();
        assert_eq!(loaded.fixed_len, 8);
        assert_eq!(loaded.get_value(1).unwrap(), 8u64.to_le_bytes());
    }

    #[test]
    fn test_colgroup_store_refuses_iter() {
        let schema = var_schema();
        let mut data = SortableStrVec::new();
        data.push(b"x");
        let store = ReadonlyStore::build_colgroup(&schema, data).unwrap();
        assert!(store.create_store_iter().is_err());
        assert_eq!(store.get_value(0).unwrap(), b"x");
    }

    #[test]
    fn test_store_iter_order() {
        let schema = var_schema();
        let mut data = SortableStrVec::new();
        data.push(b"a");
        data.push(b"b");
        let store = ReadonlyStore::build(&schema, data).unwrap();
        let rows: Vec<_> = store.create_store_iter().unwrap().collect();
        assert_eq!(rows, vec![(0, b"a".to_vec()), (1, b"b".to_vec())]);
    }
}
