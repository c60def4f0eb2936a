//! Lock file mechanism serializing writes to a mirror.
//!
//! A mirror at `<dir>` is guarded by the sibling file `<dir>.lock`, which
//! contains JSON metadata about the holder (PID, hostname, timestamp,
//! purpose). Clones and refreshes hold it; reads never do.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extension appended to the guarded path to form the lock path.
pub const LOCK_EXTENSION: &str = "lock";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static TOMBSTONE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Information stored in the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID of the lock holder
    pub pid: u32,
    /// Hostname where the lock was acquired
    pub hostname: String,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
    /// What the holder is doing (e.g. "clone", "refresh")
    pub purpose: Option<String>,
}

/// Lock file handle that automatically releases on Drop
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    info: LockInfo,
    held: bool,
}

impl LockFile {
    /// Acquire the lock at `lock_path`.
    ///
    /// Creation is exclusive: this fails immediately if any lock file exists,
    /// stale or not. Use `acquire_with_timeout` for stale lock handling.
    pub fn acquire(lock_path: &Path, purpose: &str) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock dir {}", parent.display()))?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match read_lock_info(lock_path) {
                    Ok(info) => bail!(
                        "lock already held by pid {} on {} since {} (purpose: {:?})",
                        info.pid,
                        info.hostname,
                        info.acquired_at,
                        info.purpose
                    ),
                    Err(_) => bail!("lock already held at {}", lock_path.display()),
                }
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to create lock file {}", lock_path.display()));
            }
        };

        let info = LockInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
            purpose: Some(purpose.to_string()),
        };
        let written = serde_json::to_string_pretty(&info)
            .context("failed to serialize lock info")
            .and_then(|json| {
                file.write_all(json.as_bytes())
                    .with_context(|| format!("failed to write lock file {}", lock_path.display()))?;
                file.sync_all().context("failed to sync lock file")
            });
        if let Err(e) = written {
            let _ = fs::remove_file(lock_path);
            return Err(e);
        }

        Ok(Self {
            path: lock_path.to_path_buf(),
            info,
            held: true,
        })
    }

    /// Acquire a lock, removing an existing lock older than `stale_after`
    pub fn acquire_with_timeout(lock_path: &Path, stale_after: Duration, purpose: &str) -> Result<Self> {
        if let Ok(observed) = fs::read_to_string(lock_path) {
            let stale = match serde_json::from_str::<LockInfo>(&observed) {
                Ok(info) => {
                    let age = Utc::now() - info.acquired_at;
                    age.num_seconds().unsigned_abs() > stale_after.as_secs()
                }
                // A holder may still be writing its metadata; only reclaim
                // unreadable locks once their mtime is older than the threshold.
                Err(_) => file_age(lock_path).is_some_and(|age| age > stale_after),
            };
            if stale {
                reclaim_stale(lock_path, &observed)?;
            }
        }

        Self::acquire(lock_path, purpose)
    }

    /// Acquire a lock, waiting up to `wait` for the current holder to release it
    pub fn acquire_waiting(
        lock_path: &Path,
        stale_after: Duration,
        wait: Duration,
        purpose: &str,
    ) -> Result<Self> {
        let deadline = Instant::now() + wait;
        loop {
            match Self::acquire_with_timeout(lock_path, stale_after, purpose) {
                Ok(lock) => return Ok(lock),
                Err(e) if Instant::now() >= deadline => {
                    return Err(e).with_context(|| {
                        format!(
                            "timed out after {:?} waiting for lock {}",
                            wait,
                            lock_path.display()
                        )
                    });
                }
                Err(_) => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata this handle wrote.
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release the lock file.
    ///
    /// A lock file that no longer carries this handle's metadata belongs to
    /// someone else and is left alone.
    pub fn release(&mut self) -> Result<()> {
        if self.held && read_lock_info(&self.path).is_ok_and(|info| info == self.info) {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove lock file {}", self.path.display()))?;
        }
        self.held = false;
        Ok(())
    }

    /// Check if a lock file exists
    pub fn is_locked(lock_path: &Path) -> bool {
        lock_path.exists()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Best effort to release the lock
        let _ = self.release();
    }
}

/// Move the lock at `lock_path` aside if it still holds `observed`.
///
/// The rename is atomic, so exactly one waiter takes a given file. If the
/// file taken turns out to be a newer lock than the one judged stale, it is
/// linked back into place.
fn reclaim_stale(lock_path: &Path, observed: &str) -> Result<()> {
    let mut name = lock_path.as_os_str().to_os_string();
    name.push(format!(
        ".stale-{}-{}",
        std::process::id(),
        TOMBSTONE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let tombstone = PathBuf::from(name);

    match fs::rename(lock_path, &tombstone) {
        Ok(()) => {}
        // Another waiter reclaimed it first.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to reclaim stale lock file {}", lock_path.display())
            });
        }
    }

    let taken = fs::read_to_string(&tombstone).unwrap_or_default();
    let result = if taken == observed {
        Ok(())
    } else {
        match fs::hard_link(&tombstone, lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("failed to restore live lock file {}", lock_path.display())
            }),
        }
    };
    let _ = fs::remove_file(&tombstone);
    result
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Read lock info from a lock file
pub fn read_lock_info(lock_path: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(lock_path)
        .with_context(|| format!("failed to read lock file {}", lock_path.display()))?;
    let info: LockInfo = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", lock_path.display()))?;
    Ok(info)
}

/// Lock path guarding `target`: `<target>.lock`
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_os_string();
    name.push(".");
    name.push(LOCK_EXTENSION);
    PathBuf::from(name)
}
