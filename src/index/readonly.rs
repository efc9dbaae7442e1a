//! Immutable ordered index.
//!
//! Keys are stored by local row id; `ids` is a permutation of
//! `[0, rows)` sorting the keys under the schema's compare, ties broken
//! by id. Probes binary-search the permutation.
//!
//! File layout (all integers little-endian):
//!
//! ```text
//! u64 fixed_len
//! u64 row_count
//! u64 pool_size
//! u32 ids[row_count]
//! if fixed_len == 0:
//!     u32 offsets[row_count + 1]
//! bytes pool[pool_size]
//! ```

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::sortvec::SortableStrVec;

#[derive(Debug)]
pub struct ReadonlyIndex {
    schema: Arc<Schema>,
    fixed_len: usize,
    /// Permutation of `[0, rows)`: `ids[i]` is the row whose key ranks
    /// i-th under the schema order.
    ids: Vec<u32>,
    /// Key extents by row id; empty when fixed.
    offsets: Vec<u32>,
    pool: Vec<u8>,
}

impl ReadonlyIndex {
    /// Build from keys pushed in local-id order.
    pub fn build(schema: Arc<Schema>, keys: SortableStrVec) -> Result<Self> {
        let rows = keys.len();
        let mut ids: Vec<u32> = (0..rows as u32).collect();
        ids.sort_by(|&x, &y| {
            schema
                .compare_data(keys.get(x as usize), keys.get(y as usize))
                .then_with(|| x.cmp(&y))
        });
        let fixed_len = schema.fixed_row_len();
        let (offsets, pool) = keys.into_packed()?;
        let offsets = if fixed_len != 0 {
            if pool.len() != rows * fixed_len {
                return Err(Error::InvalidData(format!(
                    "fixed index pool {} bytes does not cover {rows} keys of {fixed_len}",
                    pool.len()
                )));
            }
            Vec::new()
        } else {
            offsets
        };
        Ok(Self {
            schema,
            fixed_len,
            ids,
            offsets,
            pool,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_index_rows(&self) -> u64 {
        self.ids.len() as u64
    }

    pub fn data_storage_size(&self) -> u64 {
        (self.ids.len() * 4 + self.offsets.len() * 4 + self.pool.len()) as u64
    }

    pub fn index_storage_size(&self) -> u64 {
        (self.ids.len() * 4 + self.offsets.len() * 4) as u64
    }

    /// Key of the given row id.
    pub fn key(&self, id: u32) -> &[u8] {
        if self.fixed_len != 0 {
            let start = id as usize * self.fixed_len;
            &self.pool[start..start + self.fixed_len]
        } else {
            let start = self.offsets[id as usize] as usize;
            let end = self.offsets[id as usize + 1] as usize;
            &self.pool[start..end]
        }
    }

    /// Append the key of `id`, the per-id positional accessor.
    pub fn get_value_append(&self, id: u64, out: &mut Vec<u8>) -> Result<()> {
        if id >= self.num_index_rows() {
            return Err(Error::NotFound);
        }
        out.extend_from_slice(self.key(id as u32));
        Ok(())
    }

    /// Key at the given sorted rank.
    fn key_at_rank(&self, rank: usize) -> &[u8] {
        self.key(self.ids[rank])
    }

    /// First rank whose key is >= `key`.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        let mut lo = 0usize;
        let mut hi = self.ids.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.schema.compare_data(self.key_at_rank(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// All row ids whose key equals `key`, in ascending id order.
    pub fn search_exact(&self, key: &[u8], out: &mut Vec<u64>) {
        let mut rank = self.lower_bound(key);
        while rank < self.ids.len()
            && self.schema.compare_data(self.key_at_rank(rank), key) == Ordering::Equal
        {
            out.push(self.ids[rank] as u64);
            rank += 1;
        }
    }

    pub fn create_index_iter(self: &Arc<Self>) -> ReadonlyIndexIter {
        ReadonlyIndexIter {
            index: Arc::clone(self),
            pos: None,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_u64::<LittleEndian>(self.fixed_len as u64)?;
        w.write_u64::<LittleEndian>(self.ids.len() as u64)?;
        w.write_u64::<LittleEndian>(self.pool.len() as u64)?;
        for &id in &self.ids {
            w.write_u32::<LittleEndian>(id)?;
        }
        if self.fixed_len == 0 {
            for &off in &self.offsets {
                w.write_u32::<LittleEndian>(off)?;
            }
        }
        w.write_all(&self.pool)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(schema: Arc<Schema>, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);
        let fixed_len = r.read_u64::<LittleEndian>()? as usize;
        let rows = r.read_u64::<LittleEndian>()? as usize;
        let pool_size = r.read_u64::<LittleEndian>()? as usize;
        let mut ids = Vec::with_capacity(rows);
        for _ in 0..rows {
            ids.push(r.read_u32::<LittleEndian>()?);
        }
        let mut offsets = Vec::new();
        if fixed_len == 0 {
            offsets.reserve(rows + 1);
            for _ in 0..rows + 1 {
                offsets.push(r.read_u32::<LittleEndian>()?);
            }
        } else if pool_size != rows * fixed_len {
            return Err(Error::InvalidData(format!(
                "fixed index pool {pool_size} != {rows} keys of {fixed_len} ({})",
                path.display()
            )));
        }
        let mut pool = vec![0u8; pool_size];
        r.read_exact(&mut pool)?;
        Ok(Self {
            schema,
            fixed_len,
            ids,
            offsets,
            pool,
        })
    }
}

/// Bidirectional cursor over a readonly index.
///
/// `pos = Some(p)` means the next forward element has rank `p` and the
/// next backward element rank `p - 1`; `p == rows` is past-end and
/// `p == 0` before-begin. `None` is the initial unpositioned state. The
/// iterator keeps its index alive through the `Arc`.
pub struct ReadonlyIndexIter {
    index: Arc<ReadonlyIndex>,
    pos: Option<usize>,
}

impl ReadonlyIndexIter {
    /// Step forward; yields `(row id, key)`.
    pub fn increment(&mut self) -> Option<(u64, Vec<u8>)> {
        let n = self.index.ids.len();
        let p = self.pos.unwrap_or(0);
        if p < n {
            self.pos = Some(p + 1);
            Some((self.index.ids[p] as u64, self.index.key_at_rank(p).to_vec()))
        } else {
            self.pos = Some(n);
            None
        }
    }

    /// Step backward; yields `(row id, key)`.
    pub fn decrement(&mut self) -> Option<(u64, Vec<u8>)> {
        let n = self.index.ids.len();
        let p = self.pos.unwrap_or(n);
        if p > 0 {
            self.pos = Some(p - 1);
            Some((
                self.index.ids[p - 1] as u64,
                self.index.key_at_rank(p - 1).to_vec(),
            ))
        } else {
            self.pos = Some(0);
            None
        }
    }

    /// Position at the lower bound of `key`; the next `increment` yields
    /// it. Returns whether the key at the bound equals `key`.
    pub fn seek_lower_bound(&mut self, key: &[u8]) -> bool {
        let lb = self.index.lower_bound(key);
        self.pos = Some(lb);
        lb < self.index.ids.len()
            && self.index.schema.compare_data(self.index.key_at_rank(lb), key)
                == Ordering::Equal
    }

    /// Position at `key` if present; position unchanged on a miss.
    pub fn seek_exact(&mut self, key: &[u8]) -> bool {
        let lb = self.index.lower_bound(key);
        if lb < self.index.ids.len()
            && self.index.schema.compare_data(self.index.key_at_rank(lb), key)
                == Ordering::Equal
        {
            self.pos = Some(lb);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.pos = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, ColumnType};
    use tempfile::TempDir;

    fn u64_schema() -> Arc<Schema> {
        let mut s = Schema::new("id");
        s.add_column("id", ColumnMeta::new(ColumnType::Uint64)).unwrap();
        s.compile(None).unwrap();
        Arc::new(s)
    }

    fn str_schema() -> Arc<Schema> {
        let mut s = Schema::new("name");
        s.add_column("name", ColumnMeta::new(ColumnType::StrUtf8)).unwrap();
        s.compile(None).unwrap();
        Arc::new(s)
    }

    /// keys pushed in row-id order
    fn build_u64(keys: &[u64]) -> Arc<ReadonlyIndex> {
        let mut data = SortableStrVec::new();
        for k in keys {
            data.push(&k.to_le_bytes());
        }
        Arc::new(ReadonlyIndex::build(u64_schema(), data).unwrap())
    }

    #[test]
    fn test_ids_is_sorting_permutation() {
        let index = build_u64(&[30, 10, 20]);
        assert_eq!(index.ids, vec![1, 2, 0]);
        assert_eq!(index.key(1), 10u64.to_le_bytes());
    }

    #[test]
    fn test_ties_break_by_id() {
        let index = build_u64(&[5, 5, 5]);
        assert_eq!(index.ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_search_exact() {
        let index = build_u64(&[30, 10, 20, 10]);
        let mut hits = Vec::new();
        index.search_exact(&10u64.to_le_bytes(), &mut hits);
        assert_eq!(hits, vec![1, 3]);

        hits.clear();
        index.search_exact(&99u64.to_le_bytes(), &mut hits);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_iter_forward_backward() {
        let index = build_u64(&[30, 10, 20]);
        let mut it = index.create_index_iter();
        let forward: Vec<u64> = std::iter::from_fn(|| it.increment().map(|(id, _)| id)).collect();
        assert_eq!(forward, vec![1, 2, 0]);
        // exhausted; decrement re-yields the last element
        assert_eq!(it.decrement().unwrap().0, 0);
        assert_eq!(it.decrement().unwrap().0, 2);
        assert_eq!(it.decrement().unwrap().0, 1);
        assert!(it.decrement().is_none());
        // before-begin; increment restarts at the front
        assert_eq!(it.increment().unwrap().0, 1);
    }

    #[test]
    fn test_iter_unpositioned_decrement() {
        let index = build_u64(&[7, 3]);
        let mut it = index.create_index_iter();
        assert_eq!(it.decrement().unwrap().0, 0); // key 7, largest
        assert_eq!(it.decrement().unwrap().0, 1);
        assert!(it.decrement().is_none());
    }

    #[test]
    fn test_seek_lower_bound_then_scan() {
        let index = build_u64(&[40, 10, 30, 20]);
        let mut it = index.create_index_iter();
        assert!(!it.seek_lower_bound(&15u64.to_le_bytes()));
        // range scan from the bound upward
        let rest: Vec<u64> = std::iter::from_fn(|| {
            it.increment()
                .map(|(_, key)| u64::from_le_bytes(key.try_into().unwrap()))
        })
        .collect();
        assert_eq!(rest, vec![20, 30, 40]);
    }

    #[test]
    fn test_seek_exact_miss_keeps_position() {
        let index = build_u64(&[1, 2, 3]);
        let mut it = index.create_index_iter();
        assert!(it.seek_exact(&2u64.to_le_bytes()));
        assert!(!it.seek_exact(&99u64.to_le_bytes()));
        // still positioned at 2
        assert_eq!(
            u64::from_le_bytes(it.increment().unwrap().1.try_into().unwrap()),
            2
        );
    }

    #[test]
    fn test_empty_index_iteration() {
        let index = build_u64(&[]);
        let mut it = index.create_index_iter();
        assert!(it.increment().is_none());
        assert!(it.decrement().is_none());
        assert!(!it.seek_lower_bound(&0u64.to_le_bytes()));
    }

    #[test]
    fn test_var_len_keys() {
        let mut data = SortableStrVec::new();
        for k in [b"pear".as_slice(), b"apple", b"plum", b"apple"] {
            data.push(k);
        }
        let index = Arc::new(ReadonlyIndex::build(str_schema(), data).unwrap());
        let mut it = index.create_index_iter();
        let keys: Vec<Vec<u8>> = std::iter::from_fn(|| it.increment().map(|(_, k)| k)).collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"apple".to_vec(), b"pear".to_vec(), b"plum".to_vec()]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index-id");
        let index = build_u64(&[9, 4, 6]);
        index.save(&path).unwrap();

        let loaded = ReadonlyIndex::load(u64_schema(), &path).unwrap();
        assert_eq!(loaded.ids, index.ids);
        assert_eq!(loaded.pool, index.pool);

        let path2 = dir.path().join("again");
        loaded.save(&path2).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), std::fs::read(&path2).unwrap());
    }
}
