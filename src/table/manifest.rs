//! The table manifest (`segments.json`): an ordered snapshot of the live
//! segment directories plus the table counters, rewritten atomically
//! (tmp file + rename) on every structural change. Directories that look
//! like segments but are not listed are stale leftovers from an
//! interrupted freeze, merge, or purge, and are swept at open.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segment::{is_segment_dir, remove_dir_logged};

pub const MANIFEST_FILE: &str = "segments.json";
const MANIFEST_TMP: &str = "segments.json.tmp";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableManifest {
    /// Segment directory names in table order; at most the last one is
    /// writable.
    pub segments: Vec<String>,
    pub merge_seq: u64,
    pub next_seg_id: u64,
}

impl TableManifest {
    pub fn save(&self, table_dir: &Path) -> Result<()> {
        let tmp = table_dir.join(MANIFEST_TMP);
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, table_dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn load(table_dir: &Path) -> Result<Self> {
        let text = fs::read_to_string(table_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn exists(table_dir: &Path) -> bool {
        table_dir.join(MANIFEST_FILE).exists()
    }

    /// Remove segment-shaped directories the manifest does not list.
    pub fn sweep_stale_dirs(&self, table_dir: &Path) -> Result<()> {
        let live: HashSet<&str> = self.segments.iter().map(|s| s.as_str()).collect();
        for entry in fs::read_dir(table_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_segment_dir(&name) && !live.contains(name.as_str()) {
                tracing::info!(dir = %name, "removing stale segment dir");
                remove_dir_logged(&entry.path());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let manifest = TableManifest {
            segments: vec!["rd-0000".into(), "wr-0001".into()],
            merge_seq: 3,
            next_seg_id: 2,
        };
        manifest.save(dir.path()).unwrap();
        let loaded = TableManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.segments, manifest.segments);
        assert_eq!(loaded.merge_seq, 3);
        assert_eq!(loaded.next_seg_id, 2);
    }

    #[test]
    fn test_sweep_stale() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("rd-0000")).unwrap();
        fs::create_dir(dir.path().join("rd-m0001")).unwrap(); // interrupted merge
        fs::create_dir(dir.path().join("other")).unwrap();

        let manifest = TableManifest {
            segments: vec!["rd-0000".into()],
            merge_seq: 1,
            next_seg_id: 1,
        };
        manifest.sweep_stale_dirs(dir.path()).unwrap();
        assert!(dir.path().join("rd-0000").exists());
        assert!(!dir.path().join("rd-m0001").exists());
        assert!(dir.path().join("other").exists());
    }
}
