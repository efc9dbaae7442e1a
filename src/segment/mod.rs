//! Segments: self-contained units of rows on disk, each bundling one
//! store, one index per declared key, optional column-group stores,
//! the removed-bits mask, and a small meta file.

pub mod delbits;
pub mod meta;
pub mod readonly;
pub mod writable;

pub use delbits::DelBits;
pub use meta::{SegmentKind, SegmentMeta};
pub use readonly::ReadonlySegment;
pub use writable::WritableSegment;

use std::path::Path;
use std::sync::RwLock;

use crate::error::Result;

pub const ROWS_FILE: &str = "rows";
pub const REMOVED_BITS_FILE: &str = "removed.bits";

pub fn index_file_name(index_name: &str) -> String {
    format!("index-{index_name}")
}

pub fn colgroup_file_name(colgroup_name: &str) -> String {
    format!("colgroup-{colgroup_name}")
}

/// A segment in the table's list. Writable segments sit behind a lock
/// because the table mutates them in place; readonly segments are
/// immutable apart from their removed bits.
#[derive(Debug)]
pub enum Segment {
    Writable(RwLock<WritableSegment>),
    Readonly(ReadonlySegment),
}

impl Segment {
    pub fn is_writable(&self) -> bool {
        matches!(self, Segment::Writable(_))
    }

    pub fn num_rows(&self) -> u64 {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().num_rows(),
            Segment::Readonly(seg) => seg.num_rows(),
        }
    }

    pub fn removed_count(&self) -> u64 {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().removed_count(),
            Segment::Readonly(seg) => seg.removed_count(),
        }
    }

    pub fn is_removed(&self, id: u64) -> bool {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().is_removed(id),
            Segment::Readonly(seg) => seg.is_removed(id),
        }
    }

    pub fn data_storage_size(&self) -> u64 {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().data_storage_size(),
            Segment::Readonly(seg) => seg.data_storage_size(),
        }
    }

    pub fn total_storage_size(&self) -> u64 {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().total_storage_size(),
            Segment::Readonly(seg) => seg.total_storage_size(),
        }
    }

    pub fn index_storage_size(&self, index_id: usize) -> u64 {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().index_storage_size(index_id),
            Segment::Readonly(seg) => seg.index_storage_size(index_id),
        }
    }

    pub fn get_value_append(&self, id: u64, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().get_value_append(id, out),
            Segment::Readonly(seg) => seg.get_value_append(id, out),
        }
    }

    /// Raw index hits by local id; the caller masks removed rows.
    pub fn search_exact(&self, index_id: usize, key: &[u8], out: &mut Vec<u64>) -> Result<()> {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().search_exact(index_id, key, out),
            Segment::Readonly(seg) => {
                seg.search_exact(index_id, key, out);
                Ok(())
            }
        }
    }

    pub fn dir_name(&self) -> String {
        let dir = match self {
            Segment::Writable(seg) => seg.read().unwrap().dir().to_path_buf(),
            Segment::Readonly(seg) => seg.dir().to_path_buf(),
        };
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// All slots in id order with removed flags.
    pub fn snapshot_rows(&self) -> Vec<(Vec<u8>, bool)> {
        match self {
            Segment::Writable(seg) => seg.read().unwrap().snapshot_rows(),
            Segment::Readonly(seg) => seg.snapshot_rows(),
        }
    }
}

/// Segment directory names: `wr-<n>` while writable, `rd-<n>` once
/// frozen, `rd-m<seq>` for merge outputs, `rd-p<seq>` for purge
/// rewrites.
pub fn wr_dir_name(seg_id: u64) -> String {
    format!("wr-{seg_id:04}")
}

pub fn rd_dir_name(seg_id: u64) -> String {
    format!("rd-{seg_id:04}")
}

pub fn merge_dir_name(merge_seq: u64) -> String {
    format!("rd-m{merge_seq:04}")
}

pub fn purge_dir_name(merge_seq: u64) -> String {
    format!("rd-p{merge_seq:04}")
}

pub fn is_segment_dir(name: &str) -> bool {
    name.starts_with("wr-") || name.starts_with("rd-")
}

pub(crate) fn remove_dir_logged(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "failed to remove segment dir");
    }
}
