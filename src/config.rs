use serde::{Deserialize, Serialize};

/// Tuning knobs for a table. These round-trip through the JSON schema
/// config (`meta.json`) and can also be set programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Maximum byte size of the active writable segment before it is
    /// frozen and a fresh one is opened (default: 64MB)
    pub max_writing_segment_size: u64,

    /// Minimum run of consecutive readonly segments before the merge
    /// worker combines them (default: 4)
    pub min_merge_seg_num: usize,

    /// Fraction of logically deleted rows in a readonly segment that
    /// triggers a purge rewrite (default: 0.25)
    pub purge_delete_threshold: f64,

    /// Working memory budget for freeze/merge rebuilds (default: 128MB)
    pub compressing_work_mem_size: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_writing_segment_size: 64 * 1024 * 1024,
            min_merge_seg_num: 4,
            purge_delete_threshold: 0.25,
            compressing_work_mem_size: 128 * 1024 * 1024,
        }
    }
}

impl TableConfig {
    /// Set the writable segment size trigger
    pub fn max_writing_segment_size(mut self, size: u64) -> Self {
        self.max_writing_segment_size = size;
        self
    }

    /// Set the minimum merge run length
    pub fn min_merge_seg_num(mut self, num: usize) -> Self {
        self.min_merge_seg_num = num;
        self
    }

    /// Set the purge threshold
    pub fn purge_delete_threshold(mut self, threshold: f64) -> Self {
        self.purge_delete_threshold = threshold;
        self
    }

    /// Set the freeze/merge working memory budget
    pub fn compressing_work_mem_size(mut self, size: u64) -> Self {
        self.compressing_work_mem_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TableConfig::default();
        assert_eq!(config.max_writing_segment_size, 64 * 1024 * 1024);
        assert_eq!(config.min_merge_seg_num, 4);
        assert!((config.purge_delete_threshold - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_builder() {
        let config = TableConfig::default()
            .max_writing_segment_size(4096)
            .min_merge_seg_num(2)
            .purge_delete_threshold(0.5);

        assert_eq!(config.max_writing_segment_size, 4096);
        assert_eq!(config.min_merge_seg_num, 2);
        assert!((config.purge_delete_threshold - 0.5).abs() < f64::EPSILON);
    }
}
