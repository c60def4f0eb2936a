//! Open registration proposals from the registry's issue tracker.
//!
//! The tracker is an opaque collaborator behind [`ProposalSource`]. The
//! default source shells out to the GitHub CLI. Any failure degrades to an
//! empty list plus a warning; it never fails a query.

use std::env;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use regwhen_process::{command_exists, run_command};
use regwhen_types::{Proposal, Registry};
use serde::Deserialize;

use crate::reporter::Reporter;

/// Lists open proposals for a package.
pub trait ProposalSource {
    fn open_proposals(&self, registry: &Registry, package: &str) -> Result<Vec<Proposal>>;
}

/// `gh pr list` against the registry's `issue_repo`.
#[derive(Debug, Clone, Default)]
pub struct GhProposalSource;

/// The gh executable, overridable with `REGWHEN_GH_BIN`.
pub fn gh_program() -> String {
    env::var("REGWHEN_GH_BIN").unwrap_or_else(|_| "gh".to_string())
}

#[derive(Debug, Deserialize)]
struct GhAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    title: String,
    author: Option<GhAuthor>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

impl From<GhPullRequest> for Proposal {
    fn from(pr: GhPullRequest) -> Self {
        Proposal {
            id: pr.number,
            title: pr.title,
            author: pr
                .author
                .map(|a| a.login)
                .unwrap_or_else(|| "ghost".to_string()),
            created_at: pr.created_at,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

/// Parse `gh pr list --json number,title,author,createdAt,labels` output,
/// keeping only proposals that name a version of `package`.
pub fn parse_gh_output(json: &str, package: &str) -> Result<Vec<Proposal>> {
    let prs: Vec<GhPullRequest> =
        serde_json::from_str(json).context("failed to parse gh pr list output")?;
    Ok(prs
        .into_iter()
        .map(Proposal::from)
        .filter(|p| p.proposed_version(package).is_some())
        .collect())
}

impl ProposalSource for GhProposalSource {
    fn open_proposals(&self, registry: &Registry, package: &str) -> Result<Vec<Proposal>> {
        let Some(repo) = registry.issue_repo.as_deref() else {
            bail!("registry {} has no issue_repo configured", registry.name);
        };
        let search = format!("{package} in:title");
        let program = gh_program();
        if !command_exists(&program) {
            bail!("{program} not found; install the GitHub CLI or set REGWHEN_GH_BIN");
        }
        let out = run_command(
            &program,
            &[
                "pr",
                "list",
                "--repo",
                repo,
                "--state",
                "open",
                "--search",
                &search,
                "--json",
                "number,title,author,createdAt,labels",
            ],
        )
        .with_context(|| format!("failed to execute {program}; is the GitHub CLI installed?"))?;
        out.ok().context("gh pr list failed")?;
        parse_gh_output(&out.stdout, package)
    }
}

/// Open proposals for `package`, or an empty list if the lookup failed.
pub fn lookup_proposals(
    source: &dyn ProposalSource,
    registry: &Registry,
    package: &str,
    reporter: &mut dyn Reporter,
) -> Vec<Proposal> {
    match source.open_proposals(registry, package) {
        Ok(proposals) => proposals,
        Err(e) => {
            reporter.warn(&format!(
                "could not list open proposals for {package}: {e:#}"
            ));
            Vec::new()
        }
    }
}
