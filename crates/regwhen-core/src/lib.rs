//! # regwhen-core
//!
//! Answers "when was version V of package P registered" for a git-backed
//! package registry laid out as `<Upper first char>/<Name>/Versions.toml`.
//!
//! ## Pipeline
//!
//! The flow for one query is **ensure mirror → pin tip → locate → parse →
//! resolve → search history**:
//!
//! 1. [`mirror::Mirror::ensure_fresh`] clones the registry into a bare mirror
//!    on first use and refreshes it when it is older than the package
//!    manager's own copy ([`reference::ReferenceSnapshot`]).
//! 2. [`mirror::Mirror::tip`] pins the commit every later read names.
//! 3. [`manifest`] locates and parses the package's manifest at that commit.
//! 4. [`resolve::resolve`] turns a full, partial, or absent specifier into a
//!    concrete version.
//! 5. [`history::find_introduction_time`] runs a pickaxe search for the
//!    commit that introduced the version's section.
//!
//! [`query::query`] composes these; [`query::query_batch`] runs many
//! requests against a single pinned tip.
//!
//! ## Example
//!
//! ```ignore
//! use regwhen_config::{Config, CliOverrides};
//! use regwhen_core::{query, reporter::NullReporter};
//!
//! let settings = Config::load(None)?.build_settings(CliOverrides::default())?;
//! let result = query::query(&settings, &"Example@0.5".parse()?, &mut NullReporter)?;
//! println!("{} registered at {}", result.version, result.registered_at);
//! ```

/// Query failure kinds.
pub mod error;

/// Finding the commit that introduced a version.
pub mod history;

/// Open registration proposals from the issue tracker.
pub mod issues;

/// Locating and parsing `Versions.toml`.
pub mod manifest;

/// Local bare mirror management and tip pinning.
pub mod mirror;

/// Query orchestration, single and batched.
pub mod query;

/// The package manager's copy of the registry, used as a freshness oracle.
pub mod reference;

/// Progress and diagnostics sink.
pub mod reporter;

/// Specifier resolution.
pub mod resolve;

pub use error::QueryError;
pub use mirror::{Mirror, TipSnapshot};
pub use query::{query, query_at, query_batch};
pub use reporter::{NullReporter, Reporter};


#[cfg(test)]
mod test_support;
