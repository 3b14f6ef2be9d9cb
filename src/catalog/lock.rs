//! Cross-process advisory locking for catalog files.
//!
//! Each catalog file has a `.lk` sidecar. Writers hold an exclusive
//! OS-level lock on the sidecar for the whole open-mutate-close window.
//! The kernel drops the lock with the owning process, so a sidecar left
//! behind by a crash never blocks the next writer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Error, Result};

/// How long to wait for a contended lock, and how often to re-try.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            timeout: config::DEFAULT_LOCK_TIMEOUT,
            poll_interval: config::DEFAULT_LOCK_POLL,
        }
    }
}

/// Diagnostic payload written into the sidecar by the lock holder.
/// Informational only; the OS lock is what actually excludes writers.
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// An exclusive lock on one catalog's sidecar, released on drop.
#[derive(Debug)]
pub struct CatalogLock {
    file: File,
    path: PathBuf,
}

impl CatalogLock {
    /// Acquire the lock, polling until `options.timeout` elapses.
    ///
    /// On timeout the error carries whatever holder information the
    /// current owner managed to record.
    pub fn acquire(path: &Path, scope: &str, options: &LockOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + options.timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockContention {
                            scope: scope.to_string(),
                            holder: read_holder(&mut file),
                        });
                    }
                    std::thread::sleep(options.poll_interval);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = write_holder(&mut file) {
            log::warn!("Could not record lock holder in {}: {e}", path.display());
        }
        log::debug!("Acquired catalog lock {}", path.display());
        Ok(CatalogLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        // `unlock` is qualified: std::fs::File grew an inherent method
        // with the same name.
        if let Err(e) = <File as FileExt>::unlock(&self.file) {
            log::warn!("Failed to unlock {}: {e}", self.path.display());
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_holder(file: &mut File) -> std::io::Result<()> {
    let holder = LockHolder {
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&serde_json::to_vec(&holder)?)?;
    file.flush()
}

fn read_holder(file: &mut File) -> Option<String> {
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut raw = String::new();
    file.read_to_string(&mut raw).ok()?;
    let holder: LockHolder = serde_json::from_str(&raw).ok()?;
    Some(format!(
        "pid {} since {}",
        holder.pid,
        holder.acquired_at.to_rfc3339()
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick_options() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_second_acquire_reports_contention_with_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("standalone.lk");

        let _held = CatalogLock::acquire(&path, "standalone", &quick_options()).unwrap();
        let err = CatalogLock::acquire(&path, "standalone", &quick_options()).unwrap_err();
        match err {
            Error::LockContention { scope, holder } => {
                assert_eq!(scope, "standalone");
                let info = holder.unwrap();
                assert!(info.contains(&format!("pid {}", std::process::id())));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_drop_releases_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("standalone.lk");

        let held = CatalogLock::acquire(&path, "standalone", &quick_options()).unwrap();
        drop(held);
        CatalogLock::acquire(&path, "standalone", &quick_options()).unwrap();
    }

    #[test]
    fn test_acquire_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("nested").join("ctx.lk");
        let lock = CatalogLock::acquire(&path, "context 'ctx'", &quick_options()).unwrap();
        assert_eq!(lock.path(), path);
    }
}
