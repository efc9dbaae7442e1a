//! Single-owner table directories.
//!
//! Opening a table takes an OS-level exclusive lock on a `table.lock`
//! file inside the directory, so a second process gets a clean error
//! instead of two writers corrupting segment state. The file records
//! the owner's pid; a losing opener reads it back to name the holder.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = "table.lock";

/// Exclusive ownership of one table directory, released when dropped.
#[derive(Debug)]
pub struct DirLock {
    /// Held open for the lock's lifetime.
    _file: File,
    dir: PathBuf,
}

impl DirLock {
    /// Take ownership of `dir`. Fails without blocking when another
    /// process already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::Lock(format!("open {}: {e}", path.display())))?;

        if !exclusive(&file) {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim();
            return Err(Error::Lock(if holder.is_empty() {
                format!("table dir {} is owned by another process", dir.display())
            } else {
                format!("table dir {} is owned by process {holder}", dir.display())
            }));
        }

        // stamp ownership only once the lock is ours, so a losing
        // opener never clobbers the holder's record
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            _file: file,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// The OS drops the lock with the file handle; the lock file itself is
// left behind so a waiting opener never races an unlink.

#[cfg(unix)]
fn exclusive(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    0 == unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) }
}

#[cfg(windows)]
fn exclusive(file: &File) -> bool {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::minwinbase::OVERLAPPED;
    use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    0 != unsafe {
        LockFileEx(
            file.as_raw_handle() as *mut _,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            !0,
            !0,
            &mut overlapped,
        )
    }
}

#[cfg(not(any(unix, windows)))]
fn exclusive(_file: &File) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_stamps_pid() {
        let dir = TempDir::new().unwrap();
        let lock = DirLock::acquire(dir.path()).expect("acquire");
        assert_eq!(lock.dir(), dir.path());
        let stamped = std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(stamped, std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_names_holder() {
        let dir = TempDir::new().unwrap();
        let _held = DirLock::acquire(dir.path()).expect("first acquire");
        match DirLock::acquire(dir.path()) {
            Err(Error::Lock(msg)) => {
                assert!(msg.contains(&std::process::id().to_string()), "{msg}");
            }
            other => panic!("expected lock error, got {other:?}"),
        }
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = DirLock::acquire(dir.path()).expect("first acquire");
        }
        DirLock::acquire(dir.path()).expect("reacquire after drop");
    }
}
