//! Finding the commit that introduced a version's manifest section.

use chrono::{DateTime, Utc};
use regwhen_git as git;

use crate::error::{QueryError, Result};
use crate::mirror::TipSnapshot;

/// Header line of `version`'s manifest section: `["<version>"]`.
pub fn section_header(version: &str) -> String {
    format!("[\"{version}\"]")
}

/// Oldest commit reachable from the tip whose diff to `path` added or
/// removed `version`'s section header.
pub fn find_introduction(
    tip: &TipSnapshot,
    path: &str,
    package: &str,
    version: &str,
) -> Result<git::CommitStamp> {
    let header = section_header(version);
    let hits = git::pickaxe(&tip.mirror, &tip.commit, path, &header).map_err(|e| {
        QueryError::VersionNotFound {
            package: package.to_string(),
            specifier: version.to_string(),
            reason: format!("history search failed: {e:#}"),
        }
    })?;

    hits.into_iter()
        .next()
        .ok_or_else(|| QueryError::VersionNotFound {
            package: package.to_string(),
            specifier: version.to_string(),
            reason: format!("no commit in the history of {path} introduces {header}"),
        })
}

/// Registration time of `version`, in UTC.
pub fn find_introduction_time(
    tip: &TipSnapshot,
    path: &str,
    package: &str,
    version: &str,
) -> Result<DateTime<Utc>> {
    find_introduction(tip, path, package, version).map(|stamp| stamp.time)
}
