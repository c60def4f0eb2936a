//! Local bare mirror of a registry.
//!
//! A mirror is either absent or a complete bare clone: clones land in a
//! sibling `.partial-<pid>` directory and are renamed into place only once
//! `git clone` succeeds. Clone and refresh both hold the mirror's lock file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regwhen_config::Settings;
use regwhen_git as git;
use regwhen_lock::{LockFile, lock_path_for};
use regwhen_types::Registry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::QueryError;
use crate::reference::ReferenceSnapshot;
use crate::reporter::Reporter;

/// Branch used when none is configured and the mirror has no symbolic HEAD.
pub const FALLBACK_BRANCH: &str = "master";

/// The commit every read of one query is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipSnapshot {
    pub mirror: PathBuf,
    pub commit: String,
}

/// Directory name of a registry's mirror: `<name>-<12 hex of sha256(url)>`.
pub fn mirror_id(registry: &Registry) -> String {
    let digest = Sha256::digest(registry.url.as_bytes());
    let hex = hex::encode(digest);
    format!("{}-{}", registry.name, &hex[..12])
}

/// Commit time of the repository's `HEAD`, in UTC. Used for reference
/// copies; a mirror reads its pinned branch instead.
///
/// `None` when `path` is not a repository or has no commits. Only paths that
/// are themselves repositories are probed, so an enclosing repository is
/// never picked up by accident.
pub fn last_update_time(path: &Path) -> Option<DateTime<Utc>> {
    if !git::is_bare_repo(path) && !path.join(".git").exists() {
        return None;
    }
    git::commit_time(path, "HEAD").ok()
}

/// Staleness rule: no mirror time means stale, no reference time means fresh.
pub fn stale_between(mirror: Option<DateTime<Utc>>, reference: Option<DateTime<Utc>>) -> bool {
    match (mirror, reference) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(m), Some(r)) => m < r,
    }
}

/// Manager for one registry's mirror.
#[derive(Debug, Clone)]
pub struct Mirror {
    registry: Registry,
    path: PathBuf,
    reference: ReferenceSnapshot,
    lock_stale_after: Duration,
    lock_wait: Duration,
}

impl Mirror {
    pub fn new(settings: &Settings) -> Self {
        let path = settings
            .cache_dir
            .join("mirrors")
            .join(mirror_id(&settings.registry));
        Self {
            registry: settings.registry.clone(),
            path,
            reference: ReferenceSnapshot::new(
                settings.registry.name.clone(),
                settings.depots.clone(),
            ),
            lock_stale_after: settings.lock_stale_after,
            lock_wait: settings.lock_wait,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reference(&self) -> &ReferenceSnapshot {
        &self.reference
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    /// Whether a complete mirror exists on disk.
    pub fn exists(&self) -> bool {
        git::is_bare_repo(&self.path)
    }

    fn lock(&self, purpose: &str) -> Result<LockFile> {
        LockFile::acquire_waiting(
            &self.lock_path(),
            self.lock_stale_after,
            self.lock_wait,
            purpose,
        )
    }

    fn unavailable(&self, err: anyhow::Error) -> QueryError {
        QueryError::MirrorUnavailable {
            registry: self.registry.name.clone(),
            detail: format!("{err:#}"),
        }
    }

    /// Return the mirror path, cloning first if no valid mirror exists.
    pub fn ensure(&self, reporter: &mut dyn Reporter) -> Result<PathBuf, QueryError> {
        if self.exists() {
            return Ok(self.path.clone());
        }
        self.clone_locked(reporter).map_err(|e| self.unavailable(e))?;
        Ok(self.path.clone())
    }

    fn clone_locked(&self, reporter: &mut dyn Reporter) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create mirror dir {}", parent.display()))?;
        }
        let _lock = self.lock("clone")?;
        // Another process may have finished the clone while we waited.
        if self.exists() {
            return Ok(());
        }
        if self.path.exists() {
            reporter.warn(&format!(
                "removing incomplete mirror at {}",
                self.path.display()
            ));
            fs::remove_dir_all(&self.path).with_context(|| {
                format!("failed to remove incomplete mirror {}", self.path.display())
            })?;
        }

        let partial = self.partial_path();
        if partial.exists() {
            fs::remove_dir_all(&partial)
                .with_context(|| format!("failed to remove {}", partial.display()))?;
        }

        reporter.info(&format!(
            "cloning registry {} from {}",
            self.registry.name, self.registry.url
        ));
        if let Err(e) = git::clone_bare(&self.registry.url, &partial) {
            let _ = fs::remove_dir_all(&partial);
            return Err(e);
        }
        if let Err(e) = fs::rename(&partial, &self.path) {
            let _ = fs::remove_dir_all(&partial);
            return Err(e).with_context(|| {
                format!("failed to move clone into place at {}", self.path.display())
            });
        }
        Ok(())
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".partial-{}", std::process::id()));
        PathBuf::from(name)
    }

    /// The branch fetched on refresh and pinned by [`Mirror::tip`].
    pub fn branch(&self) -> String {
        self.registry
            .branch
            .clone()
            .or_else(|| git::head_branch(&self.path))
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string())
    }

    /// Commit time of the pinned branch tip, in UTC.
    ///
    /// Reads the same ref [`Mirror::tip`] pins, so a refresh of the
    /// configured branch always moves it.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        if !self.exists() {
            return None;
        }
        let commit = self.tip_commit().ok()?;
        git::commit_time(&self.path, &commit).ok()
    }

    pub fn is_stale(&self) -> bool {
        stale_between(self.last_update_time(), self.reference.update_time())
    }

    /// Fetch the branch from upstream under the mirror lock.
    pub fn try_refresh(&self) -> Result<()> {
        let _lock = self.lock("refresh")?;
        git::fetch_branch(&self.path, &self.branch())
    }

    /// Refresh, reporting failure as a warning. Returns whether it succeeded.
    pub fn refresh(&self, reporter: &mut dyn Reporter) -> bool {
        reporter.info(&format!("refreshing registry {}", self.registry.name));
        match self.try_refresh() {
            Ok(()) => true,
            Err(e) => {
                reporter.warn(&format!(
                    "refresh of registry {} failed, using existing mirror: {e:#}",
                    self.registry.name
                ));
                false
            }
        }
    }

    fn refresh_if_stale(&self) -> Result<bool> {
        let _lock = self.lock("refresh")?;
        // A concurrent refresh may already have caught up.
        if !self.is_stale() {
            return Ok(false);
        }
        git::fetch_branch(&self.path, &self.branch())?;
        Ok(true)
    }

    /// Ensure the mirror exists and refresh it if it is behind the reference.
    pub fn ensure_fresh(&self, reporter: &mut dyn Reporter) -> Result<PathBuf, QueryError> {
        let path = self.ensure(reporter)?;
        if self.is_stale() {
            reporter.info(&format!(
                "registry {} mirror is older than the reference copy, refreshing",
                self.registry.name
            ));
            if let Err(e) = self.refresh_if_stale() {
                reporter.warn(&format!(
                    "refresh of registry {} failed, using existing mirror: {e:#}",
                    self.registry.name
                ));
            }
        }
        Ok(path)
    }

    fn tip_commit(&self) -> Result<String> {
        let rev = format!("refs/heads/{}", self.branch());
        git::resolve_commit(&self.path, &rev).or_else(|_| git::resolve_commit(&self.path, "HEAD"))
    }

    /// Pin the current tip of the branch.
    pub fn tip(&self) -> Result<TipSnapshot, QueryError> {
        let commit = self.tip_commit().map_err(|e| self.unavailable(e))?;
        Ok(TipSnapshot {
            mirror: self.path.clone(),
            commit,
        })
    }
}
