//! RAII lock file protocol for atomic index rewrites.
//!
//! Writers never touch a live index file in place. They take a lock by
//! creating `<path>.lock` exclusively, stream the new contents into it, and
//! commit with an atomic rename. Readers holding a mapping of the old file
//! keep seeing the old bytes; a reader opening after the rename sees the new
//! file in full. Dropping an uncommitted lock rolls back by unlinking the
//! `.lock` file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{LockError, UtilError};
use crate::Result;

const LOCK_SUFFIX: &str = ".lock";

/// Exclusive lock on a file path, held until commit or rollback.
#[derive(Debug)]
pub struct LockFile {
    /// The target file path (without .lock suffix).
    path: PathBuf,
    /// The lock file path (with .lock suffix).
    lock_path: PathBuf,
    /// Open handle for writing the replacement contents. `None` after the
    /// handle has been closed for commit.
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    /// Acquire a lock on the given path by creating `<path>.lock` with
    /// O_CREAT|O_EXCL semantics.
    ///
    /// Fails with [`LockError::AlreadyLocked`] if another holder exists.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = PathBuf::from(format!("{}{}", path.display(), LOCK_SUFFIX));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    UtilError::Lock(LockError::AlreadyLocked {
                        path: lock_path.clone(),
                    })
                } else {
                    UtilError::Lock(LockError::Create {
                        path: lock_path.clone(),
                        source: e,
                    })
                }
            })?;

        Ok(Self {
            path,
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    /// The path of the target file (without .lock).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path of the lock file itself.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Mutable access to the underlying file, for writers that need to hand
    /// the handle to a streaming encoder.
    pub fn file_mut(&mut self) -> &mut File {
        // The handle only disappears inside commit/rollback, which consume self.
        self.file.as_mut().expect("lock file handle still open")
    }

    /// Commit: fsync, close, and atomically rename `.lock` onto the target.
    pub fn commit(mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| self.commit_error(e))?;
            file.sync_all().map_err(|e| self.commit_error(e))?;
        }

        fs::rename(&self.lock_path, &self.path).map_err(|e| self.commit_error(e))?;
        self.committed = true;
        Ok(())
    }

    /// Rollback: remove the `.lock` file (also happens on drop).
    pub fn rollback(mut self) -> Result<()> {
        self.file.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)?;
        }
        self.committed = true;
        Ok(())
    }

    fn commit_error(&self, source: io::Error) -> UtilError {
        UtilError::Lock(LockError::Commit {
            path: self.lock_path.clone(),
            source,
        })
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .flush()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_write_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        fs::write(&target, b"old").unwrap();

        let mut lock = LockFile::acquire(&target).unwrap();
        assert!(lock.lock_path().exists());
        lock.write_all(b"new").unwrap();
        lock.commit().unwrap();

        assert!(!dir.path().join("index.lock").exists());
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn rollback_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        fs::write(&target, b"original").unwrap();

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.write_all(b"discarded").unwrap();
        lock.rollback().unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert!(!dir.path().join("index.lock").exists());
    }

    #[test]
    fn drop_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        fs::write(&target, b"original").unwrap();

        {
            let mut lock = LockFile::acquire(&target).unwrap();
            lock.write_all(b"dropped").unwrap();
        }

        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert!(!dir.path().join("index.lock").exists());
    }

    #[test]
    fn second_holder_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");

        let _held = LockFile::acquire(&target).unwrap();
        match LockFile::acquire(&target) {
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => {}
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }

    #[test]
    fn lock_creates_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh");

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.write_all(b"contents").unwrap();
        lock.commit().unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"contents");
    }
}
