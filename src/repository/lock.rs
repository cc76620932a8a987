// src/repository/lock.rs

//! Advisory lock for repository writers
//!
//! Updates are not safe to run concurrently against the same repository.
//! Callers that may race take a `RepositoryLock` on the archive first; the
//! lock is a `<archive>.lck` file holding the owner's PID and is removed
//! when the guard is dropped. A lock left behind by a crashed process has to
//! be deleted by hand.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
}

/// Guard holding a repository lock
#[derive(Debug)]
pub struct RepositoryLock {
    path: PathBuf,
}

impl RepositoryLock {
    /// Lock file path for an archive
    pub fn lock_path(archive: &Path) -> PathBuf {
        let mut path = archive.as_os_str().to_owned();
        path.push(".lck");
        PathBuf::from(path)
    }

    /// PID recorded in an existing lock, if the archive is locked
    pub fn holder(archive: &Path) -> Result<Option<u32>> {
        let path = Self::lock_path(archive);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(
                serde_json::from_str::<LockInfo>(&content)
                    .map(|info| info.pid)
                    .unwrap_or_else(|e| {
                        warn!("Unreadable lock file {}: {}", path.display(), e);
                        0
                    }),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the lock, failing with [`Error::Locked`] if another writer holds it
    pub fn acquire(archive: &Path) -> Result<Self> {
        let path = Self::lock_path(archive);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pid = Self::holder(archive)?.unwrap_or(0);
                return Err(Error::Locked { path, pid });
            }
            Err(e) => return Err(e.into()),
        };

        let info = LockInfo {
            pid: std::process::id(),
        };
        let content = serde_json::to_string(&info)
            .map_err(|e| Error::InitError(format!("Failed to encode lock file: {}", e)))?;
        file.write_all(content.as_bytes())?;

        debug!("Acquired repository lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released repository lock {}", self.path.display()),
            Err(e) => warn!("Failed to remove lock file {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            RepositoryLock::lock_path(Path::new("/srv/repo/core.files")),
            PathBuf::from("/srv/repo/core.files.lck")
        );
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("core.files");

        let lock = RepositoryLock::acquire(&archive).unwrap();
        assert!(lock.path().is_file());
        assert_eq!(RepositoryLock::holder(&archive).unwrap(), Some(std::process::id()));

        drop(lock);
        assert_eq!(RepositoryLock::holder(&archive).unwrap(), None);
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("core.files");

        let _lock = RepositoryLock::acquire(&archive).unwrap();
        match RepositoryLock::acquire(&archive) {
            Err(Error::Locked { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected lock error, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_lock_reports_pid_zero() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("core.files");
        fs::write(RepositoryLock::lock_path(&archive), "not json").unwrap();

        assert_eq!(RepositoryLock::holder(&archive).unwrap(), Some(0));
        assert!(matches!(
            RepositoryLock::acquire(&archive),
            Err(Error::Locked { pid: 0, .. })
        ));
    }
}
