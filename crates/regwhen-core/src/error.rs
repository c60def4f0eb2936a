//! Query failure kinds.
//!
//! Every variant is fatal to the single query it occurred in. Refresh and
//! issue-tracker failures are not represented here: they are reported as
//! warnings and never abort a query.

/// Errors that abort a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The mirror could not be cloned (or its lock could not be taken for cloning).
    #[error("registry mirror for '{registry}' is unavailable: {detail}")]
    MirrorUnavailable { registry: String, detail: String },

    /// No manifest for the package exists at the pinned tip.
    #[error("package '{package}' not found in registry '{registry}'")]
    PackageNotFound { package: String, registry: String },

    /// The manifest exists but could not be read.
    #[error("cannot read {path} at {commit}: {detail}")]
    ManifestUnreadable {
        path: String,
        commit: String,
        detail: String,
    },

    /// The manifest has no `["<version>"]` sections.
    #[error("no versions found in the manifest of '{package}'")]
    NoVersionsFound { package: String },

    /// The specifier matched nothing, or the matched version has no
    /// introducing commit.
    #[error("version '{specifier}' of '{package}' not found: {reason}")]
    VersionNotFound {
        package: String,
        specifier: String,
        reason: String,
    },
}

impl QueryError {
    /// Stable snake_case name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::MirrorUnavailable { .. } => "mirror_unavailable",
            QueryError::PackageNotFound { .. } => "package_not_found",
            QueryError::ManifestUnreadable { .. } => "manifest_unreadable",
            QueryError::NoVersionsFound { .. } => "no_versions_found",
            QueryError::VersionNotFound { .. } => "version_not_found",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, QueryError>;
