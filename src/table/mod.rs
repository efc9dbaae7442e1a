//! The composite table: an ordered list of segments behind one
//! reader-writer lock, a prefix-sum vector mapping global row ids onto
//! `(segment, local id)`, and the write/read/lifecycle paths over them.

pub mod iter;
pub mod manifest;
mod merge;
pub mod registry;

pub use iter::{TableIndexIter, TableStoreIter};
pub use manifest::TableManifest;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use crate::dirlock::DirLock;
use crate::error::{Error, Result};
use crate::schema::config::SchemaConfig;
use crate::schema::{ColumnVec, Schema};
use crate::segment::{
    wr_dir_name, ReadonlySegment, Segment, WritableSegment,
};
use crate::tasks;

use iter::{ScanGuard, SegCursor};

pub const TABLE_META_FILE: &str = "meta.json";
const STAGING_PREFIXES: [&str; 3] = ["conv-", "merge-", "purge-"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PurgeStatus {
    None = 0,
    Pending = 1,
    InQueue = 2,
    Purging = 3,
}

/// Everything the table lock guards: the segment list, the prefix sums,
/// and the physical-id counter for new segment directories.
pub(crate) struct TableState {
    pub segments: Vec<Arc<Segment>>,
    /// `row_num_vec[i]` is the first gid of segment i;
    /// `row_num_vec[len]` the total row count.
    pub row_num_vec: Vec<u64>,
    pub next_seg_id: u64,
}

/// Map a gid onto `(segment index, local id)` by upper-bound search.
pub(crate) fn locate_in(row_num_vec: &[u64], gid: u64) -> Option<(usize, u64)> {
    let total = *row_num_vec.last()?;
    if gid >= total {
        return None;
    }
    let seg_idx = row_num_vec.partition_point(|&v| v <= gid) - 1;
    Some((seg_idx, gid - row_num_vec[seg_idx]))
}

pub struct Table {
    pub(crate) dir: PathBuf,
    pub(crate) schema: Arc<SchemaConfig>,
    pub(crate) state: RwLock<TableState>,
    pub(crate) merge_seq: AtomicU64,
    pub(crate) tobe_drop: AtomicBool,
    pub(crate) failed: AtomicBool,
    pub(crate) is_merging: AtomicBool,
    pub(crate) purge_status: AtomicU8,
    pub(crate) bg_task_num: AtomicUsize,
    pub(crate) scanning_ref_count: AtomicUsize,
    /// Serializes freeze conversions; the staging dir is per segment.
    pub(crate) convert_lock: Mutex<()>,
    /// Serializes merge and purge passes.
    pub(crate) compress_lock: Mutex<()>,
    _dirlock: DirLock,
}

impl Table {
    /// Create a fresh table directory holding the given schema config.
    pub fn create(dir: &Path, schema: SchemaConfig) -> Result<Arc<Self>> {
        fs::create_dir_all(dir)?;
        if dir.join(TABLE_META_FILE).exists() {
            return Err(Error::InvalidData(format!(
                "table already exists at {}",
                dir.display()
            )));
        }
        let dirlock = DirLock::acquire(dir)?;
        schema.save_json_file(&dir.join(TABLE_META_FILE))?;
        let schema = Arc::new(schema);

        let wr = WritableSegment::create(dir.join(wr_dir_name(0)), Arc::clone(&schema))?;
        let state = TableState {
            segments: vec![Arc::new(Segment::Writable(RwLock::new(wr)))],
            row_num_vec: vec![0, 0],
            next_seg_id: 1,
        };
        let table = Arc::new(Self {
            dir: dir.to_path_buf(),
            schema,
            state: RwLock::new(state),
            merge_seq: AtomicU64::new(0),
            tobe_drop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            is_merging: AtomicBool::new(false),
            purge_status: AtomicU8::new(PurgeStatus::None as u8),
            bg_task_num: AtomicUsize::new(0),
            scanning_ref_count: AtomicUsize::new(0),
            convert_lock: Mutex::new(()),
            compress_lock: Mutex::new(()),
            _dirlock: dirlock,
        });
        {
            let st = table.state.read().unwrap();
            table.save_manifest_locked(&st)?;
        }
        Ok(table)
    }

    /// Open an existing table directory.
    pub fn open(dir: &Path) -> Result<Arc<Self>> {
        let dirlock = DirLock::acquire(dir)?;
        let schema = SchemaConfig::load_json_file(&dir.join(TABLE_META_FILE))?;
        if !registry::is_registered(&schema.class) {
            return Err(Error::InvalidSchema(format!(
                "unknown table class '{}'",
                schema.class
            )));
        }
        let schema = Arc::new(schema);

        // clear interrupted lifecycle staging
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir()
                && STAGING_PREFIXES.iter().any(|p| name.starts_with(p))
            {
                tracing::info!(dir = %name, "removing interrupted staging dir");
                crate::segment::remove_dir_logged(&entry.path());
            }
        }

        let man = TableManifest::load(dir)?;
        man.sweep_stale_dirs(dir)?;

        let mut segments: Vec<Arc<Segment>> = Vec::with_capacity(man.segments.len());
        for name in &man.segments {
            let seg_dir = dir.join(name);
            let seg = if name.starts_with("wr-") {
                Segment::Writable(RwLock::new(WritableSegment::open(
                    seg_dir,
                    Arc::clone(&schema),
                )?))
            } else {
                Segment::Readonly(ReadonlySegment::open(seg_dir, Arc::clone(&schema))?)
            };
            segments.push(Arc::new(seg));
        }

        let mut state = TableState {
            segments,
            row_num_vec: Vec::new(),
            next_seg_id: man.next_seg_id,
        };
        // writing always targets the trailing segment; reopen with a
        // fresh one when the last session finished its writes
        let needs_wr = state
            .segments
            .last()
            .map_or(true, |s| !s.is_writable());
        if needs_wr {
            let seg_id = state.next_seg_id;
            state.next_seg_id += 1;
            let wr = WritableSegment::create(dir.join(wr_dir_name(seg_id)), Arc::clone(&schema))?;
            state.segments.push(Arc::new(Segment::Writable(RwLock::new(wr))));
        }
        Self::rebuild_row_num_vec(&mut state);

        let table = Arc::new(Self {
            dir: dir.to_path_buf(),
            schema,
            state: RwLock::new(state),
            merge_seq: AtomicU64::new(man.merge_seq),
            tobe_drop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            is_merging: AtomicBool::new(false),
            purge_status: AtomicU8::new(PurgeStatus::None as u8),
            bg_task_num: AtomicUsize::new(0),
            scanning_ref_count: AtomicUsize::new(0),
            convert_lock: Mutex::new(()),
            compress_lock: Mutex::new(()),
            _dirlock: dirlock,
        });
        {
            let st = table.state.read().unwrap();
            table.save_manifest_locked(&st)?;
        }
        Ok(table)
    }

    pub(crate) fn rebuild_row_num_vec(state: &mut TableState) {
        let mut vec = Vec::with_capacity(state.segments.len() + 1);
        vec.push(0u64);
        for seg in &state.segments {
            vec.push(vec.last().unwrap() + seg.num_rows());
        }
        state.row_num_vec = vec;
        debug_assert!(state.row_num_vec.windows(2).all(|w| w[0] <= w[1]));
    }

    pub(crate) fn manifest_from_state(&self, state: &TableState) -> TableManifest {
        TableManifest {
            segments: state.segments.iter().map(|s| s.dir_name()).collect(),
            merge_seq: self.merge_seq.load(AtomicOrdering::SeqCst),
            next_seg_id: state.next_seg_id,
        }
    }

    pub(crate) fn save_manifest_locked(&self, state: &TableState) -> Result<()> {
        let result = self.manifest_from_state(state).save(&self.dir);
        if result.is_err() {
            // disk no longer matches memory; reject writes, let reads drain
            self.failed.store(true, AtomicOrdering::SeqCst);
        }
        result
    }

    /// Sweep superseded segment directories, unless a scanner could
    /// still pick them up at open time. Runs with the read lock held so
    /// the live set cannot race a publish.
    pub(crate) fn cleanup_stale_dirs(&self) {
        if self.scanning_ref_count.load(AtomicOrdering::SeqCst) > 0 {
            tracing::debug!("scanners active, deferring stale dir cleanup");
            return;
        }
        let st = self.state.read().unwrap();
        let man = self.manifest_from_state(&st);
        if let Err(e) = man.sweep_stale_dirs(&self.dir) {
            tracing::warn!(error = %e, "stale dir sweep failed");
        }
    }

    fn guard_write(&self) -> Result<()> {
        if self.tobe_drop.load(AtomicOrdering::SeqCst) {
            return Err(Error::DropInProgress);
        }
        if self.failed.load(AtomicOrdering::SeqCst) {
            return Err(Error::InvalidData("table is failed, writes rejected".into()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // write path

    /// Insert a packed row; returns its global id.
    pub fn insert_row(self: &Arc<Self>, row: &[u8]) -> Result<u64> {
        self.guard_write()?;
        let cols = self.schema.row_schema.parse_row(row)?;
        let mut st = self.state.write().unwrap();
        self.insert_row_locked(&mut st, row, &cols)
    }

    fn insert_row_locked(
        self: &Arc<Self>,
        st: &mut TableState,
        row: &[u8],
        cols: &ColumnVec,
    ) -> Result<u64> {
        self.maybe_create_new_segment(st)?;
        self.insert_check_seg_dup(st, row, cols)?;

        let last = st.segments.len() - 1;
        let base = st.row_num_vec[last];
        let wr_row = self.schema.wrt_schema.select_parent_row(row, cols)?;
        let seg = match &*st.segments[last] {
            Segment::Writable(w) => w,
            Segment::Readonly(_) => {
                return Err(Error::InvalidData("trailing segment is not writable".into()))
            }
        };
        match seg.write().unwrap().append(&wr_row, cols) {
            Ok(sub_id) => {
                st.row_num_vec[last + 1] += 1;
                Ok(base + sub_id)
            }
            Err(Error::DuplicateKey {
                index_id,
                key,
                existing_gid,
            }) => Err(Error::DuplicateKey {
                index_id,
                key,
                existing_gid: base + existing_gid,
            }),
            Err(e) => Err(e),
        }
    }

    /// Freeze the active segment and open a fresh one when the size
    /// trigger fires.
    fn maybe_create_new_segment(self: &Arc<Self>, st: &mut TableState) -> Result<()> {
        let last = st.segments.len() - 1;
        if st.segments[last].data_storage_size()
            < self.schema.config.max_writing_segment_size
        {
            return Ok(());
        }
        if self.freeze_current_locked(st)? {
            self.enqueue_flush();
        }
        Ok(())
    }

    /// Freeze the trailing writable segment (persisting its dumps) and
    /// push a fresh one. No-op on an empty segment.
    fn freeze_current_locked(&self, st: &mut TableState) -> Result<bool> {
        let last = st.segments.len() - 1;
        let seg = match &*st.segments[last] {
            Segment::Writable(w) => w,
            Segment::Readonly(_) => return Ok(false),
        };
        {
            let mut wr = seg.write().unwrap();
            if wr.num_rows() == 0 {
                return Ok(false);
            }
            wr.freeze()?;
            wr.save()?;
        }
        let seg_id = st.next_seg_id;
        st.next_seg_id += 1;
        let wr = WritableSegment::create(
            self.dir.join(wr_dir_name(seg_id)),
            Arc::clone(&self.schema),
        )?;
        st.segments.push(Arc::new(Segment::Writable(RwLock::new(wr))));
        let total = *st.row_num_vec.last().unwrap();
        st.row_num_vec.push(total);
        self.save_manifest_locked(st)?;
        tracing::info!(seg_id, "opened new writable segment");
        Ok(true)
    }

    fn enqueue_flush(self: &Arc<Self>) {
        if let Err(e) = tasks::put_to_flush_queue(Arc::downgrade(self)) {
            tracing::warn!(error = %e, "flush enqueue failed; conversion deferred");
        }
    }

    /// Probe every earlier segment's unique indexes for the row's keys.
    fn insert_check_seg_dup(
        &self,
        st: &TableState,
        row: &[u8],
        cols: &ColumnVec,
    ) -> Result<()> {
        if st.segments.len() < 2 {
            return Ok(());
        }
        let last = st.segments.len() - 1;
        let mut hits = Vec::new();
        for &index_id in &self.schema.uniq_indices {
            let key = self
                .schema
                .get_index_schema(index_id)
                .select_parent_row(row, cols)?;
            for (seg_idx, seg) in st.segments[..last].iter().enumerate() {
                hits.clear();
                seg.search_exact(index_id, &key, &mut hits)?;
                if let Some(&sub) = hits.iter().find(|&&sub| !seg.is_removed(sub)) {
                    return Err(Error::DuplicateKey {
                        index_id,
                        key,
                        existing_gid: st.row_num_vec[seg_idx] + sub,
                    });
                }
            }
        }
        Ok(())
    }

    /// Update the row at `gid`. A row in the active writable segment
    /// whose changed unique keys are free updates in place and keeps its
    /// gid; anything else is a logical delete plus insert, returning the
    /// new gid.
    pub fn update_row(self: &Arc<Self>, gid: u64, row: &[u8]) -> Result<u64> {
        self.guard_write()?;
        let cols = self.schema.row_schema.parse_row(row)?;
        let mut st = self.state.write().unwrap();
        let (seg_idx, sub) = locate_in(&st.row_num_vec, gid).ok_or(Error::NotFound)?;
        let seg = Arc::clone(&st.segments[seg_idx]);
        if seg.is_removed(sub) {
            return Err(Error::NotFound);
        }
        let last = st.segments.len() - 1;

        if seg_idx == last {
            if let Segment::Writable(wr) = &*seg {
                // changed unique keys must be free in the other segments
                let old_row = {
                    let mut buf = Vec::new();
                    wr.read().unwrap().get_value_append(sub, &mut buf)?;
                    buf
                };
                let old_cols = self.schema.row_schema.parse_row(&old_row)?;
                let mut hits = Vec::new();
                for &index_id in &self.schema.uniq_indices {
                    let index_schema = self.schema.get_index_schema(index_id);
                    let new_key = index_schema.select_parent_row(row, &cols)?;
                    let old_key = index_schema.select_parent_row(&old_row, &old_cols)?;
                    if new_key == old_key {
                        continue;
                    }
                    for (other_idx, other) in st.segments[..last].iter().enumerate() {
                        hits.clear();
                        other.search_exact(index_id, &new_key, &mut hits)?;
                        if let Some(&hit) = hits.iter().find(|&&h| !other.is_removed(h)) {
                            return Err(Error::DuplicateKey {
                                index_id,
                                key: new_key,
                                existing_gid: st.row_num_vec[other_idx] + hit,
                            });
                        }
                    }
                }
                let base = st.row_num_vec[seg_idx];
                return match wr.write().unwrap().replace_row(sub, row, &cols) {
                    Ok(()) => Ok(gid),
                    Err(Error::DuplicateKey {
                        index_id,
                        key,
                        existing_gid,
                    }) => Err(Error::DuplicateKey {
                        index_id,
                        key,
                        existing_gid: base + existing_gid,
                    }),
                    Err(e) => Err(e),
                };
            }
        }

        // readonly or frozen home: logical delete, then insert through
        // the normal path (which sees the old row as removed)
        match &*seg {
            Segment::Readonly(ro) => {
                ro.set_removed(sub);
            }
            Segment::Writable(wr) => {
                wr.write().unwrap().mark_removed(sub);
            }
        }
        match self.insert_row_locked(&mut st, row, &cols) {
            Ok(new_gid) => Ok(new_gid),
            Err(e) => {
                match &*seg {
                    Segment::Readonly(ro) => {
                        ro.clear_removed(sub);
                    }
                    Segment::Writable(wr) => {
                        wr.write().unwrap().clear_removed(sub);
                    }
                }
                Err(e)
            }
        }
    }

    /// Logically delete the row at `gid`; returns whether it was live.
    pub fn remove_row(self: &Arc<Self>, gid: u64) -> Result<bool> {
        self.guard_write()?;
        let mut purge_candidate = false;
        let removed = {
            let st = self.state.write().unwrap();
            let Some((seg_idx, sub)) = locate_in(&st.row_num_vec, gid) else {
                return Ok(false);
            };
            let active = seg_idx + 1 == st.segments.len();
            match &*st.segments[seg_idx] {
                // the active segment keeps its indexes compact; a frozen
                // one only gets its bit set, conversion drops the keys
                Segment::Writable(wr) if active => wr.write().unwrap().remove_row(sub)?,
                Segment::Writable(wr) => wr.write().unwrap().mark_removed(sub),
                Segment::Readonly(ro) => {
                    let removed = ro.set_removed(sub);
                    if removed {
                        let rows = ro.num_rows();
                        purge_candidate = rows > 0
                            && ro.removed_count() as f64
                                >= self.schema.config.purge_delete_threshold * rows as f64;
                    }
                    removed
                }
            }
        };
        if purge_candidate {
            if let Err(e) = self.async_purge_delete() {
                tracing::warn!(error = %e, "purge enqueue failed");
            }
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // read path

    pub fn get_value_append(&self, gid: u64, out: &mut Vec<u8>) -> Result<()> {
        let st = self.state.read().unwrap();
        let (seg_idx, sub) = locate_in(&st.row_num_vec, gid).ok_or(Error::NotFound)?;
        let seg = &st.segments[seg_idx];
        if seg.is_removed(sub) {
            return Err(Error::NotFound);
        }
        seg.get_value_append(sub, out)
    }

    pub fn get_value(&self, gid: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.get_value_append(gid, &mut out)?;
        Ok(out)
    }

    pub fn exists(&self, gid: u64) -> bool {
        let st = self.state.read().unwrap();
        match locate_in(&st.row_num_vec, gid) {
            Some((seg_idx, sub)) => !st.segments[seg_idx].is_removed(sub),
            None => false,
        }
    }

    /// Collect the gids of all live rows holding `key` on the given
    /// index, in segment order.
    pub fn index_search_exact(
        &self,
        index_id: usize,
        key: &[u8],
        out: &mut Vec<u64>,
    ) -> Result<()> {
        if index_id >= self.schema.get_index_num() {
            return Err(Error::InvalidSchema(format!(
                "index id {index_id} out of range"
            )));
        }
        let st = self.state.read().unwrap();
        let mut hits = Vec::new();
        for (seg_idx, seg) in st.segments.iter().enumerate() {
            hits.clear();
            seg.search_exact(index_id, key, &mut hits)?;
            for &sub in &hits {
                if !seg.is_removed(sub) {
                    out.push(st.row_num_vec[seg_idx] + sub);
                }
            }
        }
        Ok(())
    }

    pub fn index_key_exists(&self, index_id: usize, key: &[u8]) -> Result<bool> {
        let mut out = Vec::new();
        self.index_search_exact(index_id, key, &mut out)?;
        Ok(!out.is_empty())
    }

    /// Selected columns of a row, each in its framed encoding.
    pub fn select_columns(&self, gid: u64, column_ids: &[usize]) -> Result<Vec<u8>> {
        let row = self.get_value(gid)?;
        let cols = self.schema.row_schema.parse_row(&row)?;
        let mut out = Vec::new();
        for &cid in column_ids {
            if cid >= cols.len() {
                return Err(Error::InvalidSchema(format!(
                    "column id {cid} out of range"
                )));
            }
            self.schema
                .row_schema
                .project_to_norm(cols.col(&row, cid), cid, &mut out)?;
        }
        Ok(out)
    }

    /// One column's raw value. Readonly segments serve it from the
    /// column-group store when the column is materialized in one.
    pub fn select_one_column(&self, gid: u64, column_id: usize) -> Result<Vec<u8>> {
        if column_id >= self.schema.column_num() {
            return Err(Error::InvalidSchema(format!(
                "column id {column_id} out of range"
            )));
        }
        let st = self.state.read().unwrap();
        let (seg_idx, sub) = locate_in(&st.row_num_vec, gid).ok_or(Error::NotFound)?;
        let seg = &st.segments[seg_idx];
        if seg.is_removed(sub) {
            return Err(Error::NotFound);
        }
        if let (Segment::Readonly(ro), Some(cp)) =
            (&**seg, self.schema.col_project[column_id])
        {
            if let Some(cg_store) = ro.colgroup(cp.colgroup_id as usize) {
                let group_row = cg_store.get_value(sub)?;
                let cg_schema = self.schema.get_colgroup_schema(cp.colgroup_id as usize);
                let group_cols = cg_schema.parse_row(&group_row)?;
                return Ok(group_cols
                    .col(&group_row, cp.sub_column_id as usize)
                    .to_vec());
            }
        }
        let mut row = Vec::new();
        seg.get_value_append(sub, &mut row)?;
        let cols = self.schema.row_schema.parse_row(&row)?;
        Ok(cols.col(&row, column_id).to_vec())
    }

    // ------------------------------------------------------------------
    // iterators

    pub fn create_store_iter_forward(self: &Arc<Self>) -> TableStoreIter {
        self.make_store_iter(true)
    }

    pub fn create_store_iter_backward(self: &Arc<Self>) -> TableStoreIter {
        self.make_store_iter(false)
    }

    fn make_store_iter(self: &Arc<Self>, forward: bool) -> TableStoreIter {
        let st = self.state.read().unwrap();
        let guard = ScanGuard::new(Arc::clone(self));
        TableStoreIter::new(guard, st.segments.clone(), st.row_num_vec.clone(), forward)
    }

    pub fn create_index_iter_forward(self: &Arc<Self>, index_id: usize) -> Result<TableIndexIter> {
        self.make_index_iter(index_id, true)
    }

    pub fn create_index_iter_backward(self: &Arc<Self>, index_id: usize) -> Result<TableIndexIter> {
        self.make_index_iter(index_id, false)
    }

    fn make_index_iter(self: &Arc<Self>, index_id: usize, forward: bool) -> Result<TableIndexIter> {
        if index_id >= self.schema.get_index_num() {
            return Err(Error::InvalidSchema(format!(
                "index id {index_id} out of range"
            )));
        }
        let st = self.state.read().unwrap();
        let mut cursors = Vec::with_capacity(st.segments.len());
        for seg in &st.segments {
            let cursor = match &**seg {
                Segment::Readonly(ro) => SegCursor::Readonly(ro.index(index_id).create_index_iter()),
                Segment::Writable(wr) => SegCursor::Snapshot {
                    entries: wr.read().unwrap().index(index_id).snapshot_sorted(),
                    pos: None,
                },
            };
            cursors.push(cursor);
        }
        let bases = st.row_num_vec[..st.segments.len()].to_vec();
        let guard = ScanGuard::new(Arc::clone(self));
        Ok(TableIndexIter::new(
            guard,
            Arc::clone(self.schema.get_index_schema(index_id)),
            st.segments.clone(),
            bases,
            cursors,
            forward,
        ))
    }

    // ------------------------------------------------------------------
    // lifecycle

    /// Persist all writable state and removed bits.
    pub fn flush(&self) -> Result<()> {
        let st = self.state.write().unwrap();
        for seg in &st.segments {
            match &**seg {
                Segment::Writable(wr) => wr.read().unwrap().save()?,
                Segment::Readonly(ro) => ro.save_delbits()?,
            }
        }
        self.save_manifest_locked(&st)?;
        Ok(())
    }

    /// Freeze the active segment (if non-empty) and enqueue it for
    /// background conversion.
    pub fn freeze_flush_writable_segment(self: &Arc<Self>) -> Result<bool> {
        self.guard_write()?;
        let frozen = {
            let mut st = self.state.write().unwrap();
            self.freeze_current_locked(&mut st)?
        };
        if frozen {
            self.enqueue_flush();
        }
        Ok(frozen)
    }

    /// Freeze the active segment and synchronously convert every frozen
    /// segment to readonly before returning.
    pub fn sync_finish_writing(self: &Arc<Self>) -> Result<()> {
        self.guard_write()?;
        {
            let mut st = self.state.write().unwrap();
            self.freeze_current_locked(&mut st)?;
        }
        self.convert_frozen_segments()?;
        self.flush()
    }

    /// Queue a purge pass on the compress worker.
    pub fn async_purge_delete(self: &Arc<Self>) -> Result<()> {
        self.guard_write()?;
        let prev = self.purge_status.load(AtomicOrdering::SeqCst);
        if prev == PurgeStatus::InQueue as u8 || prev == PurgeStatus::Purging as u8 {
            return Ok(());
        }
        self.purge_status
            .store(PurgeStatus::InQueue as u8, AtomicOrdering::SeqCst);
        match tasks::put_to_compress_queue(Arc::downgrade(self)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.purge_status
                    .store(PurgeStatus::None as u8, AtomicOrdering::SeqCst);
                Err(e)
            }
        }
    }

    /// Whether a merge-worthy run of readonly segments exists.
    pub fn needs_merge(&self) -> bool {
        let min_run = self.schema.config.min_merge_seg_num.max(2);
        let st = self.state.read().unwrap();
        let last = st.segments.len().saturating_sub(1);
        let mut run = 0usize;
        for seg in &st.segments[..last] {
            if seg.is_writable() {
                run = 0;
            } else {
                run += 1;
                if run >= min_run {
                    return true;
                }
            }
        }
        false
    }

    /// Mark the table dropped, reject further operations, and delete the
    /// directory.
    pub fn drop_table(self: &Arc<Self>) -> Result<()> {
        if self.tobe_drop.swap(true, AtomicOrdering::SeqCst) {
            return Err(Error::DropInProgress);
        }
        {
            let mut st = self.state.write().unwrap();
            st.segments.clear();
            st.row_num_vec = vec![0];
        }
        tracing::info!(dir = %self.dir.display(), "dropping table");
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            tracing::warn!(error = %e, "failed to remove table dir");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // accessors

    pub fn row_schema(&self) -> &Arc<Schema> {
        &self.schema.row_schema
    }

    pub fn schema_config(&self) -> &Arc<SchemaConfig> {
        &self.schema
    }

    pub fn get_index_schema(&self, index_id: usize) -> &Arc<Schema> {
        self.schema.get_index_schema(index_id)
    }

    pub fn get_index_id(&self, index_column_names: &str) -> Option<usize> {
        self.schema.get_index_id(index_column_names)
    }

    pub fn get_index_num(&self) -> usize {
        self.schema.get_index_num()
    }

    pub fn get_seg_num(&self) -> usize {
        self.state.read().unwrap().segments.len()
    }

    pub fn get_writable_seg_num(&self) -> usize {
        let st = self.state.read().unwrap();
        st.segments.iter().filter(|s| s.is_writable()).count()
    }

    /// Total rows across segments, logically deleted ones included
    /// until purge.
    pub fn num_data_rows(&self) -> u64 {
        *self.state.read().unwrap().row_num_vec.last().unwrap()
    }

    pub fn data_storage_size(&self) -> u64 {
        let st = self.state.read().unwrap();
        st.segments.iter().map(|s| s.data_storage_size()).sum()
    }

    pub fn total_storage_size(&self) -> u64 {
        let st = self.state.read().unwrap();
        st.segments.iter().map(|s| s.total_storage_size()).sum()
    }

    pub fn index_storage_size(&self, index_id: usize) -> u64 {
        let st = self.state.read().unwrap();
        st.segments
            .iter()
            .map(|s| s.index_storage_size(index_id))
            .sum()
    }

    pub fn to_json_str(&self, row: &[u8]) -> Result<String> {
        self.schema.row_schema.to_json_str(row)
    }

    pub(crate) fn row_num_vec_snapshot(&self) -> Vec<u64> {
        self.state.read().unwrap().row_num_vec.clone()
    }
}
