//! Freshness oracle: the package manager's own copy of the registry.
//!
//! A depot holds the registry either unpacked as `registries/<name>` or as a
//! `registries/<name>.tar.gz` archive. Both are probed and the more recent
//! timestamp wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::mirror::last_update_time;

/// Read-only view of the reference copies of one registry across depots.
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    name: String,
    depots: Vec<PathBuf>,
}

fn mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified: SystemTime = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

impl ReferenceSnapshot {
    pub fn new(name: impl Into<String>, depots: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            depots,
        }
    }

    /// Candidate locations, in depot order: the unpacked directory, then the archive.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(self.depots.len() * 2);
        for depot in &self.depots {
            let registries = depot.join("registries");
            out.push(registries.join(&self.name));
            out.push(registries.join(format!("{}.tar.gz", self.name)));
        }
        out
    }

    /// Most recent update time across all reference copies, if any exists.
    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.depots
            .iter()
            .flat_map(|depot| {
                let registries = depot.join("registries");
                [
                    directory_time(&registries.join(&self.name)),
                    archive_time(&registries.join(format!("{}.tar.gz", self.name))),
                ]
            })
            .flatten()
            .max()
    }
}

/// Unpacked registries are usually git checkouts; use their HEAD commit time
/// and fall back to the directory's own mtime.
fn directory_time(dir: &Path) -> Option<DateTime<Utc>> {
    if !dir.is_dir() {
        return None;
    }
    last_update_time(dir).or_else(|| mtime(dir))
}

fn archive_time(archive: &Path) -> Option<DateTime<Utc>> {
    if !archive.is_file() {
        return None;
    }
    mtime(archive)
}
