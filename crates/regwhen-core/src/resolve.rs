//! Version specifier resolution.
//!
//! Precedence: no specifier means the last manifest entry (yanked or not);
//! an exact match among all entries wins next; otherwise the specifier is a
//! prefix matched against non-yanked entries, first on a dot boundary, then
//! as a bare prefix. The first match in manifest order is returned.

use regwhen_types::VersionSpecifier;

use crate::error::{QueryError, Result};
use crate::manifest::Manifest;

pub fn resolve(manifest: &Manifest, specifier: &VersionSpecifier) -> Result<String> {
    let spec = match specifier {
        VersionSpecifier::Latest => {
            return manifest
                .entries()
                .last()
                .map(|entry| entry.version.clone())
                .ok_or_else(|| QueryError::NoVersionsFound {
                    package: manifest.package().to_string(),
                });
        }
        VersionSpecifier::Version(spec) => spec.as_str(),
    };

    if manifest.entries().iter().any(|entry| entry.version == spec) {
        return Ok(spec.to_string());
    }

    let dotted = format!("{spec}.");
    let partial = manifest
        .versions(false)
        .find(|entry| entry.version.starts_with(&dotted))
        .or_else(|| {
            manifest
                .versions(false)
                .find(|entry| entry.version.starts_with(spec))
        });

    match partial {
        Some(entry) => Ok(entry.version.clone()),
        None => Err(QueryError::VersionNotFound {
            package: manifest.package().to_string(),
            specifier: spec.to_string(),
            reason: "no exact or partial match (matching versions may all be yanked)"
                .to_string(),
        }),
    }
}
