//! Mutable per-segment row container: an ordered sequence of byte
//! strings indexed by local id. Deletion is logical; `remove` clears the
//! payload but keeps the slot so the id space stays dense.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{read_dump, write_dump};

const DUMP_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WritableStore {
    rows: Vec<Vec<u8>>,
    /// Running total of live payload bytes.
    data_size: u64,
}

impl WritableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next local id.
    pub fn append(&mut self, row: &[u8]) -> u64 {
        let id = self.rows.len() as u64;
        self.rows.push(row.to_vec());
        self.data_size += row.len() as u64;
        id
    }

    pub fn replace(&mut self, id: u64, row: &[u8]) {
        let slot = &mut self.rows[id as usize];
        self.data_size -= slot.len() as u64;
        self.data_size += row.len() as u64;
        *slot = row.to_vec();
    }

    /// Clear the payload; the slot stays reserved.
    pub fn remove(&mut self, id: u64) {
        let slot = &mut self.rows[id as usize];
        self.data_size -= slot.len() as u64;
        slot.clear();
    }

    pub fn num_data_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn data_storage_size(&self) -> u64 {
        (self.rows.len() * std::mem::size_of::<Vec<u8>>()) as u64 + self.data_size
    }

    pub fn get_value_append(&self, id: u64, out: &mut Vec<u8>) -> Result<()> {
        match self.rows.get(id as usize) {
            Some(row) => {
                out.extend_from_slice(row);
                Ok(())
            }
            None => Err(crate::error::Error::NotFound),
        }
    }

    pub fn get_value(&self, id: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.get_value_append(id, &mut out)?;
        Ok(out)
    }

    pub fn row(&self, id: u64) -> &[u8] {
        &self.rows[id as usize]
    }

    /// Visit all slots in id order, cleared ones included; the table
    /// masks removed rows through the segment's removed bits.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.rows
            .iter()
            .enumerate()
            .map(|(id, row)| (id as u64, row.as_slice()))
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
    fn test_append_replace_remove() {
        let mut store = WritableStore::new();
        assert_eq!(store.append(b"aaa"), 0);
        assert_eq!(store.append(b"bb"), 1);
        assert_eq!(store.num_data_rows(), 2);
        assert_eq!(store.get_value(0).unwrap(), b"aaa");

        store.replace(0, b"cccc");
        assert_eq!(store.get_value(0).unwrap(), b"cccc");

        store.remove(1);
        assert_eq!(store.get_value(1).unwrap(), b"");
        // slot reserved: the next append still gets id 2
        assert_eq!(store.append(b"d"), 2);
    }

    #[test]
    fn test_data_size_tracks_live_payload() {
        let mut store = WritableStore::new();
        store.append(b"12345");
        let before = store.data_storage_size();
        store.remove(0);
        assert_eq!(before - store.data_storage_size(), 5);
    }

    #[test]
    fn test_iter_includes_cleared_slots() {
        let mut store = WritableStore::new();
        store.append(b"a");
        store.append(b"b");
        store.remove(0);
        let slots: Vec<_> = store.iter().map(|(id, row)| (id, row.to_vec())).collect();
        assert_eq!(slots, vec![(0, vec![]), (1, b"b".to_vec())]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows");
        let mut store = WritableStore::new();
        store.append(b"alpha");
        store.append(b"beta");
        store.remove(0);
        store.save(&path).unwrap();

        let loaded = WritableStore::load(&path).unwrap();
        assert_eq!(loaded.num_data_rows(), 2);
        assert_eq!(loaded.get_value(0).unwrap(), b"");
        assert_eq!(loaded.get_value(1).unwrap(), b"beta");
        assert_eq!(loaded.data_size, store.data_size);
    }
}
