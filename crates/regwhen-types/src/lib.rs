//! Core domain types for regwhen.
//!
//! This crate provides the types shared between the query engine, its
//! configuration layer and the command-line front end.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the registry used when nothing else is configured.
pub const DEFAULT_REGISTRY_NAME: &str = "General";

/// Upstream URL of the default registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://github.com/JuliaRegistries/General.git";

/// Issue-tracker repository (`owner/repo`) of the default registry.
pub const DEFAULT_ISSUE_REPO: &str = "JuliaRegistries/General";

/// A git-backed package registry that can be mirrored and queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Registry name, also used for the reference snapshot lookup
    /// (`<depot>/registries/<name>`).
    pub name: String,
    /// Upstream git URL (anything `git clone` accepts).
    pub url: String,
    /// Primary branch. Detected from the mirror's `HEAD` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// `owner/repo` on the issue tracker where new-version proposals are opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_repo: Option<String>,
    /// Whether this is the default registry when no `active` entry is configured.
    #[serde(default)]
    pub default: bool,
}

impl Registry {
    /// The public General registry.
    pub fn general() -> Self {
        Self {
            name: DEFAULT_REGISTRY_NAME.to_string(),
            url: DEFAULT_REGISTRY_URL.to_string(),
            branch: None,
            issue_repo: Some(DEFAULT_ISSUE_REPO.to_string()),
            default: true,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::general()
    }
}

/// One section of a package's `Versions.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Version string exactly as written in the section header.
    pub version: String,
    /// Whether the section carries `yanked = true`.
    pub yanked: bool,
}

impl VersionEntry {
    pub fn new(version: impl Into<String>, yanked: bool) -> Self {
        Self {
            version: version.into(),
            yanked,
        }
    }
}

/// What the user asked for: the latest version or a (possibly partial) version string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VersionSpecifier {
    /// No version given.
    #[default]
    Latest,
    /// An exact version or a leading prefix of one, e.g. `1.9` or `1`.
    Version(String),
}

impl VersionSpecifier {
    pub fn from_option(spec: Option<&str>) -> Self {
        match spec {
            Some(v) => Self::Version(v.to_string()),
            None => Self::Latest,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Latest => None,
            Self::Version(v) => Some(v),
        }
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Version(v) => write!(f, "{v}"),
        }
    }
}

/// Error returned when a `pkg[@version]` argument cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestParseError {
    #[error("empty package name in '{0}'")]
    EmptyName(String),
    #[error("empty version after '@' in '{0}'")]
    EmptyVersion(String),
}

/// A single `pkg[@version]` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    pub name: String,
    pub specifier: VersionSpecifier,
}

impl PackageRequest {
    pub fn new(name: impl Into<String>, specifier: VersionSpecifier) -> Self {
        Self {
            name: name.into(),
            specifier,
        }
    }
}

impl FromStr for PackageRequest {
    type Err = RequestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, specifier) = match s.split_once('@') {
            Some((name, version)) => {
                let version = version.trim();
                if version.is_empty() {
                    return Err(RequestParseError::EmptyVersion(s.to_string()));
                }
                (name.trim(), VersionSpecifier::Version(version.to_string()))
            }
            None => (s, VersionSpecifier::Latest),
        };
        if name.is_empty() {
            return Err(RequestParseError::EmptyName(s.to_string()));
        }
        Ok(Self::new(name, specifier))
    }
}

impl fmt::Display for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.specifier {
            VersionSpecifier::Latest => write!(f, "{}", self.name),
            VersionSpecifier::Version(v) => write!(f, "{}@{v}", self.name),
        }
    }
}

/// Answer to "when was this version registered".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub package: String,
    /// The concrete version the specifier resolved to.
    pub version: String,
    /// Commit time of the commit that introduced the version's section.
    pub registered_at: DateTime<Utc>,
    pub yanked: bool,
    /// Commit that introduced the section.
    pub commit: String,
    /// Mirror tip every read of this query was pinned to.
    pub tip: String,
}

/// An open proposal to register a new version, as listed by the issue tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Label that marks a proposal for automatic merging.
pub const AUTOMERGE_LABEL: &str = "automerge";

impl Proposal {
    /// True if any label is exactly `automerge` (case-sensitive).
    pub fn is_automerge(&self) -> bool {
        self.labels.iter().any(|l| l == AUTOMERGE_LABEL)
    }

    /// The version proposed for `package`, when the title has the
    /// `New version: <package> v<version>` shape.
    pub fn proposed_version(&self, package: &str) -> Option<&str> {
        let rest = self.title.trim().strip_prefix("New version:")?.trim_start();
        let rest = rest.strip_prefix(package)?.strip_prefix(" v")?;
        let version = rest.split_whitespace().next()?;
        Some(version)
    }
}
