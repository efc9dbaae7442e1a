//! Table-wide iteration: store iterators concatenate segments in gid
//! order; index iterators heap-merge the per-segment sorted cursors so
//! keys come out in schema order across the whole table.
//!
//! Both kinds capture a snapshot of the segment list under the table
//! read lock and hold the scanning refcount, which defers deletion of
//! superseded segment directories while they are alive.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::index::ReadonlyIndexIter;
use crate::schema::Schema;
use crate::segment::Segment;

use super::{locate_in, Table};

/// Holds the table's scanning refcount for an iterator's lifetime.
pub(crate) struct ScanGuard {
    table: Arc<Table>,
}

impl ScanGuard {
    pub(crate) fn new(table: Arc<Table>) -> Self {
        table
            .scanning_ref_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Self { table }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.table
            .scanning_ref_count
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Rows of the whole table in gid order (or reverse), removed rows
/// masked. The snapshot bounds the scan: rows inserted afterwards are
/// not visited.
pub struct TableStoreIter {
    _guard: ScanGuard,
    segments: Vec<Arc<Segment>>,
    row_num_vec: Vec<u64>,
    pos: u64,
    end: u64,
    forward: bool,
}

impl TableStoreIter {
    pub(crate) fn new(
        guard: ScanGuard,
        segments: Vec<Arc<Segment>>,
        row_num_vec: Vec<u64>,
        forward: bool,
    ) -> Self {
        let end = *row_num_vec.last().unwrap_or(&0);
        Self {
            _guard: guard,
            segments,
            row_num_vec,
            pos: if forward { 0 } else { end },
            end,
            forward,
        }
    }

    fn fetch(&self, gid: u64) -> Option<Vec<u8>> {
        let (seg_idx, sub) = locate_in(&self.row_num_vec, gid)?;
        let seg = &self.segments[seg_idx];
        if seg.is_removed(sub) {
            return None;
        }
        let mut buf = Vec::new();
        seg.get_value_append(sub, &mut buf).ok()?;
        Some(buf)
    }
}

impl Iterator for TableStoreIter {
    type Item = (u64, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.forward {
            while self.pos < self.end {
                let gid = self.pos;
                self.pos += 1;
                if let Some(row) = self.fetch(gid) {
                    return Some((gid, row));
                }
            }
            None
        } else {
            while self.pos > 0 {
                self.pos -= 1;
                if let Some(row) = self.fetch(self.pos) {
                    return Some((self.pos, row));
                }
            }
            None
        }
    }
}

/// Per-segment index cursor: a live iterator over a readonly index, or a
/// sorted snapshot of a writable index.
pub(crate) enum SegCursor {
    Readonly(ReadonlyIndexIter),
    Snapshot {
        entries: Vec<(Vec<u8>, u64)>,
        pos: Option<usize>,
    },
}

impl SegCursor {
    fn increment(&mut self) -> Option<(u64, Vec<u8>)> {
        match self {
            SegCursor::Readonly(it) => it.increment(),
            SegCursor::Snapshot { entries, pos } => {
                let p = pos.unwrap_or(0);
                if p < entries.len() {
                    *pos = Some(p + 1);
                    let (key, id) = &entries[p];
                    Some((*id, key.clone()))
                } else {
                    *pos = Some(entries.len());
                    None
                }
            }
        }
    }

    fn decrement(&mut self) -> Option<(u64, Vec<u8>)> {
        match self {
            SegCursor::Readonly(it) => it.decrement(),
            SegCursor::Snapshot { entries, pos } => {
                let p = pos.unwrap_or(entries.len());
                if p > 0 {
                    *pos = Some(p - 1);
                    let (key, id) = &entries[p - 1];
                    Some((*id, key.clone()))
                } else {
                    *pos = Some(0);
                    None
                }
            }
        }
    }

    fn seek_lower_bound(&mut self, schema: &Schema, key: &[u8]) -> bool {
        match self {
            SegCursor::Readonly(it) => it.seek_lower_bound(key),
            SegCursor::Snapshot { entries, pos } => {
                let lb = entries
                    .partition_point(|(k, _)| schema.compare_data(k, key) == Ordering::Less);
                *pos = Some(lb);
                lb < entries.len()
                    && schema.compare_data(&entries[lb].0, key) == Ordering::Equal
            }
        }
    }
}

/// One pending head in the merge heap. Ordering delegates to the index
/// schema; `forward` flips it so the std max-heap behaves as a min-heap
/// on ascending scans.
struct HeapEntry {
    key: Vec<u8>,
    gid: u64,
    source: usize,
    schema: Arc<Schema>,
    forward: bool,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.gid == other.gid
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self
            .schema
            .compare_data(&self.key, &other.key)
            .then_with(|| self.gid.cmp(&other.gid));
        if self.forward {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// Keys of one index across every segment, in ascending (forward) or
/// descending (backward) schema order. Removed rows are masked.
pub struct TableIndexIter {
    _guard: ScanGuard,
    schema: Arc<Schema>,
    segments: Vec<Arc<Segment>>,
    bases: Vec<u64>,
    cursors: Vec<SegCursor>,
    heap: BinaryHeap<HeapEntry>,
    forward: bool,
}

impl TableIndexIter {
    pub(crate) fn new(
        guard: ScanGuard,
        schema: Arc<Schema>,
        segments: Vec<Arc<Segment>>,
        bases: Vec<u64>,
        mut cursors: Vec<SegCursor>,
        forward: bool,
    ) -> Self {
        let mut heap = BinaryHeap::new();
        for (source, cursor) in cursors.iter_mut().enumerate() {
            let head = if forward {
                cursor.increment()
            } else {
                cursor.decrement()
            };
            if let Some((sub, key)) = head {
                heap.push(HeapEntry {
                    key,
                    gid: bases[source] + sub,
                    source,
                    schema: Arc::clone(&schema),
                    forward,
                });
            }
        }
        Self {
            _guard: guard,
            schema,
            segments,
            bases,
            cursors,
            heap,
            forward,
        }
    }

    fn refill(&mut self, source: usize) {
        let head = if self.forward {
            self.cursors[source].increment()
        } else {
            self.cursors[source].decrement()
        };
        if let Some((sub, key)) = head {
            self.heap.push(HeapEntry {
                key,
                gid: self.bases[source] + sub,
                source,
                schema: Arc::clone(&self.schema),
                forward: self.forward,
            });
        }
    }

    /// Reposition every cursor at the lower bound of `key` and restart
    /// the merge there. Forward iterators only. Returns whether some
    /// segment holds the exact key.
    pub fn seek_lower_bound(&mut self, key: &[u8]) -> bool {
        debug_assert!(self.forward);
        let mut exact = false;
        self.heap.clear();
        for source in 0..self.cursors.len() {
            let schema = Arc::clone(&self.schema);
            exact |= self.cursors[source].seek_lower_bound(&schema, key);
            self.refill(source);
        }
        exact
    }
}

impl Iterator for TableIndexIter {
    type Item = (u64, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.heap.pop() {
            self.refill(entry.source);
            let sub = entry.gid - self.bases[entry.source];
            if self.segments[entry.source].is_removed(sub) {
                continue;
            }
            return Some((entry.gid, entry.key));
        }
        None
    }
}
