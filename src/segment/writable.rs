//! The writable segment: one mutable store plus one writable index per
//! declared index, living in a `wr-<n>` directory. All mutation happens
//! under the owning table's write lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{InsertOutcome, WritableIndex};
use crate::schema::config::SchemaConfig;
use crate::schema::ColumnVec;
use crate::store::WritableStore;

use super::delbits::DelBits;
use super::meta::{SegmentKind, SegmentMeta};
use super::{index_file_name, REMOVED_BITS_FILE, ROWS_FILE};

#[derive(Debug)]
pub struct WritableSegment {
    dir: PathBuf,
    schema: Arc<SchemaConfig>,
    store: WritableStore,
    indexes: Vec<WritableIndex>,
    delbits: DelBits,
    frozen: bool,
}

impl WritableSegment {
    /// Create a fresh segment directory.
    pub fn create(dir: PathBuf, schema: Arc<SchemaConfig>) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let indexes = schema
            .index_schema_set
            .iter()
            .map(|s| WritableIndex::new(Arc::clone(s)))
            .collect();
        let seg = Self {
            dir,
            schema,
            store: WritableStore::new(),
            indexes,
            delbits: DelBits::new(),
            frozen: false,
        };
        // the empty dumps make the directory openable right away
        seg.save()?;
        Ok(seg)
    }

    /// Open a previously saved segment.
    pub fn open(dir: PathBuf, schema: Arc<SchemaConfig>) -> Result<Self> {
        let store = WritableStore::load(&dir.join(ROWS_FILE))?;
        let mut indexes = Vec::with_capacity(schema.get_index_num());
        for s in schema.index_schema_set.iter() {
            indexes.push(WritableIndex::load(
                Arc::clone(s),
                &dir.join(index_file_name(&s.name)),
            )?);
        }
        let removed_path = dir.join(REMOVED_BITS_FILE);
        let mut delbits = if removed_path.exists() {
            DelBits::load(&removed_path)?
        } else {
            DelBits::new()
        };
        delbits.ensure_len(store.num_data_rows());
        Ok(Self {
            dir,
            schema,
            store,
            indexes,
            delbits,
            frozen: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_rows(&self) -> u64 {
        self.store.num_data_rows()
    }

    pub fn removed_count(&self) -> u64 {
        self.delbits.removed_count()
    }

    pub fn is_removed(&self, id: u64) -> bool {
        self.delbits.get(id)
    }

    pub fn data_storage_size(&self) -> u64 {
        self.store.data_storage_size()
    }

    pub fn total_storage_size(&self) -> u64 {
        self.store.data_storage_size()
            + self
                .indexes
                .iter()
                .map(|i| i.index_storage_size())
                .sum::<u64>()
    }

    pub fn index_storage_size(&self, index_id: usize) -> u64 {
        self.indexes[index_id].index_storage_size()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Stop accepting writes. Fails when already frozen.
    pub fn freeze(&mut self) -> Result<()> {
        if self.frozen {
            return Err(Error::InvalidData("segment is already frozen".into()));
        }
        self.frozen = true;
        Ok(())
    }

    fn project_key(&self, index_id: usize, row: &[u8], cols: &ColumnVec) -> Result<Vec<u8>> {
        self.schema
            .get_index_schema(index_id)
            .select_parent_row(row, cols)
    }

    /// Append a row whose parsed view is `cols`. Allocates the next local
    /// id, inserts every index under the projected key, then commits the
    /// store slot. On an index failure the entries already inserted for
    /// this row are removed, so the segment is unchanged.
    ///
    /// A duplicate-key error carries the holder's local id; the table
    /// remaps it to a global id.
    pub fn append(&mut self, row: &[u8], cols: &ColumnVec) -> Result<u64> {
        if self.frozen {
            return Err(Error::InvalidData("append to frozen segment".into()));
        }
        let id = self.store.num_data_rows();
        let mut inserted: Vec<(usize, Vec<u8>)> = Vec::with_capacity(self.indexes.len());
        for index_id in 0..self.indexes.len() {
            let key = self.project_key(index_id, row, cols)?;
            let outcome = self.indexes[index_id].insert(&key, id);
            let fail = match outcome {
                Ok(InsertOutcome::Inserted) => None,
                Ok(InsertOutcome::Exists) => None,
                Ok(InsertOutcome::Duplicate { existing_id }) => Some(Error::DuplicateKey {
                    index_id,
                    key: key.clone(),
                    existing_gid: existing_id,
                }),
                Err(e) => Some(e),
            };
            if let Some(err) = fail {
                for (prev_id, prev_key) in &inserted {
                    let _ = self.indexes[*prev_id].remove(prev_key, id);
                }
                return Err(err);
            }
            inserted.push((index_id, key));
        }
        let committed = self.store.append(row);
        debug_assert_eq!(committed, id);
        self.delbits.ensure_len(id + 1);
        Ok(id)
    }

    /// In-place overwrite of a live row. Unique keys that change must be
    /// free within this segment; the table has already probed the others.
    pub fn replace_row(&mut self, id: u64, row: &[u8], cols: &ColumnVec) -> Result<()> {
        let old_row = self.store.get_value(id)?;
        let old_cols = self.schema.row_schema.parse_row(&old_row)?;

        // probe unique conflicts before touching anything
        let mut changed: Vec<(usize, Vec<u8>, Vec<u8>)> = Vec::new();
        for index_id in 0..self.indexes.len() {
            let old_key = self.project_key(index_id, &old_row, &old_cols)?;
            let new_key = self.project_key(index_id, row, cols)?;
            if old_key == new_key {
                continue;
            }
            if self.schema.get_index_schema(index_id).is_unique {
                let mut hits = Vec::new();
                self.indexes[index_id].search_exact(&new_key, &mut hits)?;
                if let Some(&holder) = hits.iter().find(|&&h| h != id) {
                    return Err(Error::DuplicateKey {
                        index_id,
                        key: new_key,
                        existing_gid: holder,
                    });
                }
            }
            changed.push((index_id, old_key, new_key));
        }

        for (index_id, old_key, new_key) in changed {
            self.indexes[index_id].remove(&old_key, id)?;
            self.indexes[index_id].insert(&new_key, id)?;
        }
        self.store.replace(id, row);
        Ok(())
    }

    /// Logical delete: drop the index entries, clear the slot, set the
    /// removed bit. Returns whether the row was live.
    pub fn remove_row(&mut self, id: u64) -> Result<bool> {
        if id >= self.store.num_data_rows() || self.delbits.get(id) {
            return Ok(false);
        }
        let row = self.store.get_value(id)?;
        let cols = self.schema.row_schema.parse_row(&row)?;
        for index_id in 0..self.indexes.len() {
            let key = self.project_key(index_id, &row, &cols)?;
            self.indexes[index_id].remove(&key, id)?;
        }
        self.store.remove(id);
        self.delbits.set(id);
        Ok(true)
    }

    /// Logical delete for a frozen segment: only the removed bit is set.
    /// The index entries stay until conversion drops them, masked by the
    /// bit everywhere they could surface.
    pub fn mark_removed(&mut self, id: u64) -> bool {
        if id >= self.store.num_data_rows() || self.delbits.get(id) {
            return false;
        }
        self.delbits.set(id)
    }

    /// Undo a mark that could not complete (update rollback).
    pub fn clear_removed(&mut self, id: u64) -> bool {
        self.delbits.clear(id)
    }

    pub fn get_value_append(&self, id: u64, out: &mut Vec<u8>) -> Result<()> {
        self.store.get_value_append(id, out)
    }

    pub fn search_exact(&self, index_id: usize, key: &[u8], out: &mut Vec<u64>) -> Result<()> {
        self.indexes[index_id].search_exact(key, out)
    }

    pub fn index(&self, index_id: usize) -> &WritableIndex {
        &self.indexes[index_id]
    }

    /// All slots in id order with their removed flag; cleared slots keep
    /// their placeholder payload.
    pub fn snapshot_rows(&self) -> Vec<(Vec<u8>, bool)> {
        self.store
            .iter()
            .map(|(id, row)| (row.to_vec(), self.delbits.get(id)))
            .collect()
    }

    /// Persist the store, every index, and the removed bits.
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.dir.join(ROWS_FILE))?;
        self.save_indices()?;
        self.delbits.save(&self.dir.join(REMOVED_BITS_FILE))?;
        SegmentMeta::new(SegmentKind::Writable, self.num_rows()).save(&self.dir)?;
        Ok(())
    }

    fn save_indices(&self) -> Result<()> {
        for index in &self.indexes {
            index.save(&self.dir.join(index_file_name(&index.schema().name)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::config::SchemaConfig;
    use tempfile::TempDir;

    fn test_schema() -> Arc<SchemaConfig> {
        Arc::new(
            SchemaConfig::load_json_str(
                r#"{
                    "columns": [
                        {"name": "id", "type": "uint64"},
                        {"name": "name", "type": "strutf8"}
                    ],
                    "indexes": [
                        {"columns": ["id"], "unique": true},
                        {"columns": ["name"], "unique": false}
                    ]
                }"#,
            )
            .unwrap(),
        )
    }

    fn row(schema: &SchemaConfig, id: u64, name: &str) -> Vec<u8> {
        schema
            .row_schema
            .combine_cols(&[&id.to_le_bytes(), name.as_bytes()])
            .unwrap()
    }

    fn append(seg: &mut WritableSegment, schema: &SchemaConfig, id: u64, name: &str) -> Result<u64> {
        let r = row(schema, id, name);
        let cols = schema.row_schema.parse_row(&r).unwrap();
        seg.append(&r, &cols)
    }

    #[test]
    fn test_append_and_search() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut seg = WritableSegment::create(dir.path().join("wr-0"), Arc::clone(&schema)).unwrap();

        assert_eq!(append(&mut seg, &schema, 1, "a").unwrap(), 0);
        assert_eq!(append(&mut seg, &schema, 2, "b").unwrap(), 1);
        assert_eq!(seg.num_rows(), 2);

        let mut hits = Vec::new();
        seg.search_exact(0, &2u64.to_le_bytes(), &mut hits).unwrap();
        assert_eq!(hits, vec![1]);

        hits.clear();
        seg.search_exact(1, b"a", &mut hits).unwrap();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn test_duplicate_rolls_back() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut seg = WritableSegment::create(dir.path().join("wr-0"), Arc::clone(&schema)).unwrap();

        append(&mut seg, &schema, 1, "a").unwrap();
        let err = append(&mut seg, &schema, 1, "z").unwrap_err();
        match err {
            Error::DuplicateKey {
                index_id,
                existing_gid,
                ..
            } => {
                assert_eq!(index_id, 0);
                assert_eq!(existing_gid, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // segment unchanged: no orphan entries in the name index
        assert_eq!(seg.num_rows(), 1);
        let mut hits = Vec::new();
        seg.search_exact(1, b"z", &mut hits).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_remove_then_reinsert_key() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut seg = WritableSegment::create(dir.path().join("wr-0"), Arc::clone(&schema)).unwrap();

        let id = append(&mut seg, &schema, 1, "a").unwrap();
        assert!(seg.remove_row(id).unwrap());
        assert!(!seg.remove_row(id).unwrap());
        assert!(seg.is_removed(id));

        // the key is free again; the slot stays reserved
        let id2 = append(&mut seg, &schema, 1, "a2").unwrap();
        assert_eq!(id2, 1);
        let mut hits = Vec::new();
        seg.search_exact(0, &1u64.to_le_bytes(), &mut hits).unwrap();
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn test_replace_row_index_sync() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut seg = WritableSegment::create(dir.path().join("wr-0"), Arc::clone(&schema)).unwrap();

        let id = append(&mut seg, &schema, 1, "a").unwrap();
        append(&mut seg, &schema, 2, "b").unwrap();

        // same unique key, new name
        let r = row(&schema, 1, "renamed");
        let cols = schema.row_schema.parse_row(&r).unwrap();
        seg.replace_row(id, &r, &cols).unwrap();

        let mut hits = Vec::new();
        seg.search_exact(1, b"renamed", &mut hits).unwrap();
        assert_eq!(hits, vec![0]);
        hits.clear();
        seg.search_exact(1, b"a", &mut hits).unwrap();
        assert!(hits.is_empty());

        // unique key collision with another row is refused
        let r = row(&schema, 2, "renamed");
        let cols = schema.row_schema.parse_row(&r).unwrap();
        assert!(matches!(
            seg.replace_row(id, &r, &cols),
            Err(Error::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_freeze_rejects_append() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut seg = WritableSegment::create(dir.path().join("wr-0"), Arc::clone(&schema)).unwrap();
        seg.freeze().unwrap();
        assert!(seg.freeze().is_err());
        assert!(append(&mut seg, &schema, 1, "a").is_err());
    }

    #[test]
    fn test_save_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let seg_dir = dir.path().join("wr-0");
        {
            let mut seg = WritableSegment::create(seg_dir.clone(), Arc::clone(&schema)).unwrap();
            append(&mut seg, &schema, 1, "a").unwrap();
            let rid = append(&mut seg, &schema, 2, "b").unwrap();
            seg.remove_row(rid).unwrap();
            seg.save().unwrap();
        }
        let seg = WritableSegment::open(seg_dir, schema).unwrap();
        assert_eq!(seg.num_rows(), 2);
        assert!(seg.is_removed(1));
        let mut hits = Vec::new();
        seg.search_exact(0, &1u64.to_le_bytes(), &mut hits).unwrap();
        assert_eq!(hits, vec![0]);
    }
}
