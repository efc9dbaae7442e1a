//! Mutable ordered index: a sorted multimap from a typed key to local
//! row ids. Mutation is serialized by the owning table's write lock, so
//! the container is a plain ordered set of `(key, id)` entries.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::Schema;
use crate::store::{read_dump, write_dump};

use super::IndexKey;

const DUMP_VERSION: u32 = 1;

/// Outcome of a writable-index insert.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The exact `(key, id)` pair is already present.
    Exists,
    /// The index is unique and the key is held by another row.
    Duplicate { existing_id: u64 },
}

#[derive(Debug)]
pub struct WritableIndex {
    schema: Arc<Schema>,
    kv: BTreeSet<(IndexKey, u64)>,
    /// Heap bytes held by byte-string keys.
    keys_len: u64,
}

#[derive(Serialize, Deserialize)]
struct Dump {
    kv: BTreeSet<(IndexKey, u64)>,
    keys_len: u64,
}

impl WritableIndex {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            kv: BTreeSet::new(),
            keys_len: 0,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_index_rows(&self) -> u64 {
        self.kv.len() as u64
    }

    /// Best-effort byte estimate: tree nodes plus key heap bytes.
    pub fn index_storage_size(&self) -> u64 {
        let entry = std::mem::size_of::<(IndexKey, u64)>() + 4 * std::mem::size_of::<usize>();
        self.kv.len() as u64 * entry as u64 + self.keys_len
    }

    fn holder_of(&self, key: &IndexKey) -> Option<u64> {
        self.kv
            .range((
                Bound::Included((key.clone(), 0)),
                Bound::Included((key.clone(), u64::MAX)),
            ))
            .next()
            .map(|(_, id)| *id)
    }

    /// Insert `(key, id)`. A unique index refuses a key held by any
    /// other row and reports the holder.
    pub fn insert(&mut self, key: &[u8], id: u64) -> Result<InsertOutcome> {
        let key = IndexKey::from_bytes(&self.schema, key)?;
        if self.schema.is_unique {
            if let Some(existing_id) = self.holder_of(&key) {
                if existing_id == id {
                    return Ok(InsertOutcome::Exists);
                }
                return Ok(InsertOutcome::Duplicate { existing_id });
            }
        }
        let heap = key.heap_len();
        if self.kv.insert((key, id)) {
            self.keys_len += heap;
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Exists)
        }
    }

    /// Erase `(key, old_id)` when the id changes, then insert
    /// `(key, new_id)`.
    pub fn replace(&mut self, key: &[u8], old_id: u64, new_id: u64) -> Result<bool> {
        let key = IndexKey::from_bytes(&self.schema, key)?;
        if old_id != new_id && self.kv.remove(&(key.clone(), old_id)) {
            self.keys_len -= key.heap_len();
        }
        let heap = key.heap_len();
        let inserted = self.kv.insert((key, new_id));
        if inserted {
            self.keys_len += heap;
        }
        Ok(inserted)
    }

    pub fn remove(&mut self, key: &[u8], id: u64) -> Result<bool> {
        let key = IndexKey::from_bytes(&self.schema, key)?;
        let removed = self.kv.remove(&(key.clone(), id));
        if removed {
            self.keys_len -= key.heap_len();
        }
        Ok(removed)
    }

    /// All row ids holding `key`, in ascending id order.
    pub fn search_exact(&self, key: &[u8], out: &mut Vec<u64>) -> Result<()> {
        let key = IndexKey::from_bytes(&self.schema, key)?;
        for (_, id) in self.kv.range((
            Bound::Included((key.clone(), 0)),
            Bound::Included((key, u64::MAX)),
        )) {
            out.push(*id);
        }
        Ok(())
    }

    /// Entries in key order as `(projected key bytes, id)`.
    pub fn snapshot_sorted(&self) -> Vec<(Vec<u8>, u64)> {
        self.kv
            .iter()
            .map(|(key, id)| (key.to_bytes(), *id))
            .collect()
    }

    pub fn create_index_iter(&self) -> WritableIndexIter<'_> {
        WritableIndexIter {
            entries: self.kv.iter().collect(),
            schema: &self.schema,
            pos: None,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dump = Dump {
            kv: self.kv.clone(),
            keys_len: self.keys_len,
        };
        let payload = bincode::serialize(&dump)?;
        write_dump(path, DUMP_VERSION, &payload)
    }

    pub fn load(schema: Arc<Schema>, path: &Path) -> Result<Self> {
        let payload = read_dump(path, DUMP_VERSION)?;
        let dump: Dump = bincode::deserialize(&payload)?;
        Ok(Self {
            schema,
            kv: dump.kv,
            keys_len: dump.keys_len,
        })
    }
}

/// Cursor over a writable index, mirroring the readonly iterator's state
/// machine. Borrowing the index freezes it for the iterator's lifetime,
/// so positions stay valid.
pub struct WritableIndexIter<'a> {
    entries: Vec<&'a (IndexKey, u64)>,
    schema: &'a Schema,
    pos: Option<usize>,
}

impl WritableIndexIter<'_> {
    pub fn increment(&mut self) -> Option<(u64, Vec<u8>)> {
        let n = self.entries.len();
        let p = self.pos.unwrap_or(0);
        if p < n {
            self.pos = Some(p + 1);
            let (key, id) = self.entries[p];
            Some((*id, key.to_bytes()))
        } else {
            self.pos = Some(n);
            None
        }
    }

    pub fn decrement(&mut self) -> Option<(u64, Vec<u8>)> {
        let n = self.entries.len();
        let p = self.pos.unwrap_or(n);
        if p > 0 {
            self.pos = Some(p - 1);
            let (key, id) = self.entries[p - 1];
            Some((*id, key.to_bytes()))
        } else {
            self.pos = Some(0);
            None
        }
    }

    pub fn seek_lower_bound(&mut self, key: &[u8]) -> bool {
        let target = match IndexKey::from_bytes(self.schema, key) {
            Ok(k) => k,
            Err(_) => {
                self.pos = Some(self.entries.len());
                return false;
            }
        };
        let lb = self
            .entries
            .partition_point(|(k, _)| k < &target);
        self.pos = Some(lb);
        lb < self.entries.len() && self.entries[lb].0 == target
    }

    pub fn seek_exact(&mut self, key: &[u8]) -> bool {
        let saved = self.pos;
        if self.seek_lower_bound(key) {
            true
        } else {
            self.pos = saved;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, ColumnType};
    use tempfile::TempDir;

    fn schema(unique: bool) -> Arc<Schema> {
        let mut s = Schema::new("id");
        s.add_column("id", ColumnMeta::new(ColumnType::Uint64)).unwrap();
        s.is_ordered = true;
        s.is_unique = unique;
        s.compile(None).unwrap();
        Arc::new(s)
    }

    fn k(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    #[test]
    fn test_insert_and_search() {
        let mut index = WritableIndex::new(schema(false));
        assert_eq!(index.insert(&k(5), 0).unwrap(), InsertOutcome::Inserted);
        assert_eq!(index.insert(&k(5), 1).unwrap(), InsertOutcome::Inserted);
        assert_eq!(index.insert(&k(5), 1).unwrap(), InsertOutcome::Exists);

        let mut hits = Vec::new();
        index.search_exact(&k(5), &mut hits).unwrap();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn test_unique_duplicate_reported() {
        let mut index = WritableIndex::new(schema(true));
        assert_eq!(index.insert(&k(7), 3).unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            index.insert(&k(7), 9).unwrap(),
            InsertOutcome::Duplicate { existing_id: 3 }
        );
        // same (key, id) pair is not a violation
        assert_eq!(index.insert(&k(7), 3).unwrap(), InsertOutcome::Exists);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut index = WritableIndex::new(schema(false));
        index.insert(&k(1), 0).unwrap();
        assert!(index.replace(&k(1), 0, 5).unwrap());

        let mut hits = Vec::new();
        index.search_exact(&k(1), &mut hits).unwrap();
        assert_eq!(hits, vec![5]);

        assert!(index.remove(&k(1), 5).unwrap());
        assert!(!index.remove(&k(1), 5).unwrap());
        assert_eq!(index.num_index_rows(), 0);
    }

    #[test]
    fn test_iter_key_order() {
        let mut index = WritableIndex::new(schema(false));
        for (key, id) in [(30u64, 0u64), (10, 1), (20, 2)] {
            index.insert(&k(key), id).unwrap();
        }
        let mut it = index.create_index_iter();
        let order: Vec<u64> = std::iter::from_fn(|| it.increment().map(|(id, _)| id)).collect();
        assert_eq!(order, vec![1, 2, 0]);

        assert_eq!(it.decrement().unwrap().0, 0);
        assert_eq!(it.decrement().unwrap().0, 2);
    }

    #[test]
    fn test_iter_seek() {
        let mut index = WritableIndex::new(schema(false));
        for (key, id) in [(10u64, 0u64), (20, 1), (40, 2)] {
            index.insert(&k(key), id).unwrap();
        }
        let mut it = index.create_index_iter();
        assert!(!it.seek_lower_bound(&k(15)));
        assert_eq!(it.increment().unwrap().0, 1); // key 20

        assert!(it.seek_exact(&k(40)));
        assert_eq!(it.increment().unwrap().0, 2);
    }

    #[test]
    fn test_string_keys_order() {
        let mut s = Schema::new("name");
        s.add_column("name", ColumnMeta::new(ColumnType::StrUtf8)).unwrap();
        s.compile(None).unwrap();
        let mut index = WritableIndex::new(Arc::new(s));
        index.insert(b"pear", 0).unwrap();
        index.insert(b"apple", 1).unwrap();

        let mut it = index.create_index_iter();
        assert_eq!(it.increment().unwrap(), (1, b"apple".to_vec()));
        assert_eq!(it.increment().unwrap(), (0, b"pear".to_vec()));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index-id");
        let mut index = WritableIndex::new(schema(true));
        index.insert(&k(2), 0).unwrap();
        index.insert(&k(1), 1).unwrap();
        index.save(&path).unwrap();

        let loaded = WritableIndex::load(schema(true), &path).unwrap();
        assert_eq!(loaded.num_index_rows(), 2);
        let mut hits = Vec::new();
        loaded.search_exact(&k(1), &mut hits).unwrap();
        assert_eq!(hits, vec![1]);
        // uniqueness survives the round trip
        assert_eq!(
            loaded
                .kv
                .iter()
                .map(|(key, _)| key.to_bytes())
                .collect::<Vec<_>>(),
            vec![k(1).to_vec(), k(2).to_vec()]
        );
    }

    #[test]
    fn test_storage_size_grows() {
        let mut index = WritableIndex::new(schema(false));
        let empty = index.index_storage_size();
        index.insert(&k(1), 0).unwrap();
        assert!(index.index_storage_size() > empty);
    }
}
