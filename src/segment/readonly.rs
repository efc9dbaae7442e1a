//! The readonly segment: an immutable packed store, one sorted index per
//! declared index, and optional column-group stores, living in an
//! `rd-<n>` directory.
//!
//! Builds preserve the local-id space of their input: logically deleted
//! slots contribute placeholder payloads (zeros for fixed layouts, empty
//! otherwise) so every index permutation still covers `[0, rows)` and
//! the prefix-sum accounting is untouched. The removed bits keep masking
//! them from queries.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::index::ReadonlyIndex;
use crate::schema::config::SchemaConfig;
use crate::schema::Schema;
use crate::sortvec::SortableStrVec;
use crate::store::ReadonlyStore;

use super::delbits::DelBits;
use super::meta::{SegmentKind, SegmentMeta};
use super::{colgroup_file_name, index_file_name, REMOVED_BITS_FILE, ROWS_FILE};

#[derive(Debug)]
pub struct ReadonlySegment {
    dir: PathBuf,
    schema: Arc<SchemaConfig>,
    store: ReadonlyStore,
    indexes: Vec<Arc<ReadonlyIndex>>,
    colgroups: Vec<ReadonlyStore>,
    /// Mutated by removeRow on rows that already froze; everything else
    /// in this segment is immutable.
    delbits: RwLock<DelBits>,
}

fn placeholder(schema: &Schema) -> Vec<u8> {
    vec![0u8; schema.fixed_row_len()]
}

impl ReadonlySegment {
    /// Build a segment from rows in local-id order and save it under
    /// `dir`. Live rows must parse against the row schema; removed slots
    /// are stored as placeholders.
    pub fn build(
        dir: PathBuf,
        schema: Arc<SchemaConfig>,
        rows: Vec<(Vec<u8>, bool)>,
    ) -> Result<Self> {
        let row_schema = &schema.row_schema;
        let index_num = schema.get_index_num();
        let colgroup_num = schema.get_colgroup_num();

        let mut row_data = SortableStrVec::with_capacity(rows.len(), 0);
        let mut index_data: Vec<SortableStrVec> =
            (0..index_num).map(|_| SortableStrVec::new()).collect();
        let mut colgroup_data: Vec<SortableStrVec> =
            (0..colgroup_num).map(|_| SortableStrVec::new()).collect();
        let mut delbits = DelBits::with_len(rows.len() as u64);

        for (id, (row, removed)) in rows.iter().enumerate() {
            if *removed {
                delbits.set(id as u64);
                row_data.push(&placeholder(row_schema));
                for (index_id, data) in index_data.iter_mut().enumerate() {
                    data.push(&placeholder(schema.get_index_schema(index_id)));
                }
                for (cg_id, data) in colgroup_data.iter_mut().enumerate() {
                    data.push(&placeholder(schema.get_colgroup_schema(cg_id)));
                }
                continue;
            }
            let cols = row_schema.parse_row(row)?;
            row_data.push(row);
            for (index_id, data) in index_data.iter_mut().enumerate() {
                let key = schema
                    .get_index_schema(index_id)
                    .select_parent_row(row, &cols)?;
                data.push(&key);
            }
            for (cg_id, data) in colgroup_data.iter_mut().enumerate() {
                let group = schema
                    .get_colgroup_schema(cg_id)
                    .select_parent_row(row, &cols)?;
                data.push(&group);
            }
        }

        let store = ReadonlyStore::build(row_schema, row_data)?;
        let mut indexes = Vec::with_capacity(index_num);
        for (index_id, data) in index_data.into_iter().enumerate() {
            let index_schema = Arc::clone(schema.get_index_schema(index_id));
            indexes.push(Arc::new(ReadonlyIndex::build(index_schema, data)?));
        }
        let mut colgroups = Vec::with_capacity(colgroup_num);
        for (cg_id, data) in colgroup_data.into_iter().enumerate() {
            colgroups.push(ReadonlyStore::build_colgroup(
                schema.get_colgroup_schema(cg_id),
                data,
            )?);
        }

        fs::create_dir_all(&dir)?;
        let seg = Self {
            dir,
            schema,
            store,
            indexes,
            colgroups,
            delbits: RwLock::new(delbits),
        };
        seg.save()?;
        Ok(seg)
    }

    pub fn open(dir: PathBuf, schema: Arc<SchemaConfig>) -> Result<Self> {
        let store = ReadonlyStore::load(&dir.join(ROWS_FILE))?;
        let mut indexes = Vec::with_capacity(schema.get_index_num());
        for s in schema.index_schema_set.iter() {
            indexes.push(Arc::new(ReadonlyIndex::load(
                Arc::clone(s),
                &dir.join(index_file_name(&s.name)),
            )?));
        }
        let mut colgroups = Vec::with_capacity(schema.get_colgroup_num());
        for s in schema.colgroup_schema_set.iter() {
            colgroups.push(ReadonlyStore::load_colgroup(
                &dir.join(colgroup_file_name(&s.name)),
            )?);
        }
        let removed_path = dir.join(REMOVED_BITS_FILE);
        let mut delbits = if removed_path.exists() {
            DelBits::load(&removed_path)?
        } else {
            DelBits::new()
        };
        delbits.ensure_len(store.num_data_rows());

        let meta = SegmentMeta::load(&dir)?;
        if meta.row_count != store.num_data_rows() {
            return Err(Error::InvalidData(format!(
                "segment meta claims {} rows, store has {} ({})",
                meta.row_count,
                store.num_data_rows(),
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            schema,
            store,
            indexes,
            colgroups,
            delbits: RwLock::new(delbits),
        })
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.dir.join(ROWS_FILE))?;
        for index in &self.indexes {
            index.save(&self.dir.join(index_file_name(&index.schema().name)))?;
        }
        for (cg_id, cg) in self.colgroups.iter().enumerate() {
            let name = &self.schema.get_colgroup_schema(cg_id).name;
            cg.save(&self.dir.join(colgroup_file_name(name)))?;
        }
        self.save_delbits()?;
        SegmentMeta::new(SegmentKind::Readonly, self.store.num_data_rows()).save(&self.dir)?;
        Ok(())
    }

    pub fn save_delbits(&self) -> Result<()> {
        self.delbits
            .read()
            .unwrap()
            .save(&self.dir.join(REMOVED_BITS_FILE))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_rows(&self) -> u64 {
        self.store.num_data_rows()
    }

    pub fn removed_count(&self) -> u64 {
        self.delbits.read().unwrap().removed_count()
    }

    pub fn is_removed(&self, id: u64) -> bool {
        self.delbits.read().unwrap().get(id)
    }

    /// Set the removed bit; returns whether the row was live.
    pub fn set_removed(&self, id: u64) -> bool {
        self.delbits.write().unwrap().set(id)
    }

    /// Undo a logical delete that could not complete (update rollback).
    pub fn clear_removed(&self, id: u64) -> bool {
        self.delbits.write().unwrap().clear(id)
    }

    /// Rebind the segment to its post-publish directory; the lifecycle
    /// workers build into a staging dir and rename at publish time.
    pub(crate) fn set_dir(&mut self, dir: PathBuf) {
        self.dir = dir;
    }

    pub fn data_storage_size(&self) -> u64 {
        self.store.data_storage_size()
    }

    pub fn total_storage_size(&self) -> u64 {
        self.store.data_storage_size()
            + self
                .indexes
                .iter()
                .map(|i| i.data_storage_size())
                .sum::<u64>()
            + self
                .colgroups
                .iter()
                .map(|c| c.data_storage_size())
                .sum::<u64>()
    }

    pub fn index_storage_size(&self, index_id: usize) -> u64 {
        self.indexes[index_id].index_storage_size()
    }

    pub fn get_value_append(&self, id: u64, out: &mut Vec<u8>) -> Result<()> {
        self.store.get_value_append(id, out)
    }

    pub fn search_exact(&self, index_id: usize, key: &[u8], out: &mut Vec<u64>) {
        self.indexes[index_id].search_exact(key, out);
    }

    pub fn index(&self, index_id: usize) -> &Arc<ReadonlyIndex> {
        &self.indexes[index_id]
    }

    /// The column-group store materializing `colgroup_id`, when built.
    pub fn colgroup(&self, colgroup_id: usize) -> Option<&ReadonlyStore> {
        self.colgroups.get(colgroup_id)
    }

    /// All slots in id order with their removed flag, for merge and
    /// purge rebuilds.
    pub fn snapshot_rows(&self) -> Vec<(Vec<u8>, bool)> {
        let delbits = self.delbits.read().unwrap();
        let mut out = Vec::with_capacity(self.num_rows() as usize);
        for id in 0..self.num_rows() {
            out.push((
                self.store.get_value(id).expect("id in range"),
                delbits.get(id),
            ));
        }
        out
    }
}
