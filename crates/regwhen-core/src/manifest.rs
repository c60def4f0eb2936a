//! Locating and parsing a package's `Versions.toml`.
//!
//! The manifest is a sequence of `["<version>"]` sections; a section whose
//! body contains `yanked = true` marks its version as yanked. Section order is
//! the registry's publishing order and is trusted as ascending.

use std::sync::LazyLock;

use regex::Regex;
use regwhen_git as git;
use regwhen_types::VersionEntry;

use crate::error::{QueryError, Result};
use crate::mirror::TipSnapshot;

pub const MANIFEST_FILE: &str = "Versions.toml";

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\["(.+?)"\]$"#).expect("valid section regex"));
static YANKED_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^yanked\s*=\s*true").expect("valid yanked regex"));

/// `<Upper first char>/<name>/Versions.toml`, or `None` for an empty name.
pub fn manifest_path(package: &str) -> Option<String> {
    let first = package.chars().next()?;
    let shard: String = first.to_uppercase().collect();
    Some(format!("{shard}/{package}/{MANIFEST_FILE}"))
}

/// Path of the package's manifest at the pinned tip, if the package exists there.
pub fn locate_package(tip: &TipSnapshot, package: &str) -> Result<Option<String>> {
    let Some(path) = manifest_path(package) else {
        return Ok(None);
    };
    let exists = git::path_exists(&tip.mirror, &tip.commit, &path).map_err(|e| {
        QueryError::ManifestUnreadable {
            path: path.clone(),
            commit: tip.commit.clone(),
            detail: format!("{e:#}"),
        }
    })?;
    Ok(exists.then_some(path))
}

/// Manifest text at the pinned tip.
///
/// A path that vanished since [`locate_package`] is reported as
/// [`QueryError::PackageNotFound`], the same as never having existed.
pub fn read_manifest_text(
    tip: &TipSnapshot,
    registry: &str,
    package: &str,
    path: &str,
) -> Result<String> {
    match git::read_blob(&tip.mirror, &tip.commit, path) {
        Ok(Some(text)) => Ok(text),
        Ok(None) => Err(QueryError::PackageNotFound {
            package: package.to_string(),
            registry: registry.to_string(),
        }),
        Err(e) => Err(QueryError::ManifestUnreadable {
            path: path.to_string(),
            commit: tip.commit.clone(),
            detail: format!("{e:#}"),
        }),
    }
}

fn sections(text: &str) -> Vec<VersionEntry> {
    let mut out: Vec<VersionEntry> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(caps) = SECTION_HEADER.captures(line) {
            out.push(VersionEntry::new(&caps[1], false));
        } else if YANKED_MARKER.is_match(line)
            && let Some(current) = out.last_mut()
        {
            current.yanked = true;
        }
    }
    out
}

/// Versions in manifest order. Yanked sections are dropped unless
/// `include_yanked` is set; they still end the preceding section.
pub fn parse_versions(text: &str, include_yanked: bool) -> Vec<VersionEntry> {
    sections(text)
        .into_iter()
        .filter(|entry| include_yanked || !entry.yanked)
        .collect()
}

/// Whether `version`'s own section carries the yanked marker.
pub fn section_yanked(text: &str, version: &str) -> bool {
    sections(text)
        .iter()
        .any(|entry| entry.version == version && entry.yanked)
}

/// A parsed manifest with at least one version section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    package: String,
    entries: Vec<VersionEntry>,
}

impl Manifest {
    pub fn parse(package: &str, text: &str) -> Result<Self> {
        let entries = sections(text);
        if entries.is_empty() {
            return Err(QueryError::NoVersionsFound {
                package: package.to_string(),
            });
        }
        Ok(Self {
            package: package.to_string(),
            entries,
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// All entries, yanked or not, in manifest order.
    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn versions(&self, include_yanked: bool) -> impl Iterator<Item = &VersionEntry> {
        self.entries
            .iter()
            .filter(move |entry| include_yanked || !entry.yanked)
    }

    pub fn is_yanked(&self, version: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.version == version && entry.yanked)
    }
}
