//! Per-segment bitvector of logically deleted local ids, persisted as
//! `removed.bits`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{read_dump, write_dump};

const DUMP_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelBits {
    words: Vec<u64>,
    len: u64,
    removed: u64,
}

impl DelBits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_len(len: u64) -> Self {
        Self {
            words: vec![0; (len as usize + 63) / 64],
            len,
            removed: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    pub fn removed_count(&self) -> u64 {
        self.removed
    }

    /// Grow to cover `len` ids; new bits are clear.
    pub fn ensure_len(&mut self, len: u64) {
        if len > self.len {
            self.len = len;
            let need = (len as usize + 63) / 64;
            if need > self.words.len() {
                self.words.resize(need, 0);
            }
        }
    }

    pub fn get(&self, id: u64) -> bool {
        if id >= self.len {
            return false;
        }
        self.words[(id / 64) as usize] & (1u64 << (id % 64)) != 0
    }

    /// Set the bit; returns whether it changed.
    pub fn set(&mut self, id: u64) -> bool {
        self.ensure_len(id + 1);
        let word = &mut self.words[(id / 64) as usize];
        let mask = 1u64 << (id % 64);
        if *word & mask == 0 {
            *word |= mask;
            self.removed += 1;
            true
        } else {
            false
        }
    }

    /// Clear the bit; returns whether it changed.
    pub fn clear(&mut self, id: u64) -> bool {
        if id >= self.len {
            return false;
        }
        let word = &mut self.words[(id / 64) as usize];
        let mask = 1u64 << (id % 64);
        if *word & mask != 0 {
            *word &= !mask;
            self.removed -= 1;
            true
        } else {
            false
        }
    }

    /// Append another bitvector, offsetting its ids past `self.len`.
    pub fn extend_from(&mut self, other: &DelBits) {
        let base = self.len;
        self.ensure_len(base + other.len);
        for id in 0..other.len {
            if other.get(id) {
                self.set(base + id);
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        write_dump(path, DUMP_VERSION, &payload)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let payload = read_dump(path, DUMP_VERSION)?;
        Ok(bincode::deserialize(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_get_count() {
        let mut bits = DelBits::with_len(100);
        assert!(!bits.get(42));
        assert!(bits.set(42));
        assert!(!bits.set(42));
        assert!(bits.get(42));
        assert_eq!(bits.removed_count(), 1);

        assert!(bits.clear(42));
        assert!(!bits.clear(42));
        assert_eq!(bits.removed_count(), 0);
    }

    #[test]
    fn test_grow_on_set() {
        let mut bits = DelBits::new();
        bits.set(200);
        assert_eq!(bits.len(), 201);
        assert!(bits.get(200));
        assert!(!bits.get(199));
    }

    #[test]
    fn test_extend_from() {
        let mut a = DelBits::with_len(3);
        a.set(1);
        let mut b = DelBits::with_len(2);
        b.set(0);
        a.extend_from(&b);
        assert_eq!(a.len(), 5);
        assert!(a.get(1));
        assert!(a.get(3));
        assert!(!a.get(4));
        assert_eq!(a.removed_count(), 2);
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("removed.bits");
        let mut bits = DelBits::with_len(70);
        bits.set(0);
        bits.set(69);
        bits.save(&path).unwrap();

        let loaded = DelBits::load(&path).unwrap();
        assert_eq!(loaded.len(), 70);
        assert!(loaded.get(0));
        assert!(loaded.get(69));
        assert_eq!(loaded.removed_count(), 2);
    }
}
