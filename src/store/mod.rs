//! Row stores: the immutable packed form readonly segments serve from,
//! and the mutable container writable segments append into.

pub mod readonly;
pub mod writable;

pub use readonly::{ReadonlyStore, ReadonlyStoreIter};
pub use writable::WritableStore;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Error, Result};

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Write a version-tagged, CRC-guarded dump of an in-memory container.
/// The writable-side files (store, index, removed bits) all use this
/// framing; the payload itself is a bincode snapshot.
pub(crate) fn write_dump(path: &Path, version: u32, payload: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    w.write_u32::<LittleEndian>(version)?;
    w.write_u64::<LittleEndian>(payload.len() as u64)?;
    w.write_u32::<LittleEndian>(CRC32.checksum(payload))?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read back a dump written by [`write_dump`], verifying version and
/// checksum.
pub(crate) fn read_dump(path: &Path, expect_version: u32) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);
    let version = r.read_u32::<LittleEndian>()?;
    if version != expect_version {
        return Err(Error::InvalidData(format!(
            "dump version {version}, expected {expect_version} ({})",
            path.display()
        )));
    }
    let len = r.read_u64::<LittleEndian>()? as usize;
    let checksum = r.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    if CRC32.checksum(&payload) != checksum {
        return Err(Error::InvalidData(format!(
            "checksum mismatch in {}",
            path.display()
        )));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dump_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump");
        write_dump(&path, 1, b"hello world").unwrap();
        assert_eq!(read_dump(&path, 1).unwrap(), b"hello world");
    }

    #[test]
    fn test_dump_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump");
        write_dump(&path, 1, b"payload").unwrap();
        assert!(matches!(read_dump(&path, 2), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_dump_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump");
        write_dump(&path, 1, b"payload").unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_dump(&path, 1), Err(Error::InvalidData(_))));
    }
}
