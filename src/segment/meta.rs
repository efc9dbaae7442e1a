//! Per-segment `meta.json`: the captured row count, creation time, and
//! segment kind, written whenever a segment is saved or built.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub kind: SegmentKind,
    pub row_count: u64,
    pub created_unix: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Writable,
    Readonly,
}

impl SegmentMeta {
    pub fn new(kind: SegmentKind, row_count: u64) -> Self {
        let created_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            kind,
            row_count,
            created_unix,
        }
    }

    pub fn save(&self, seg_dir: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(seg_dir.join(META_FILE), text)?;
        Ok(())
    }

    pub fn load(seg_dir: &Path) -> Result<Self> {
        let text = fs::read_to_string(seg_dir.join(META_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }
}
