//! Throwaway registries built from real git commits with fixed timestamps.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use regwhen_config::Settings;
use regwhen_types::Registry;
use tempfile::TempDir;

pub(crate) struct RegistryFixture {
    td: TempDir,
    pub(crate) upstream: PathBuf,
}

fn run_git(dir: &Path, args: &[&str], epoch: Option<i64>) -> String {
    let mut cmd = Command::new("git");
    cmd.args(["-c", "user.name=Registrator", "-c", "user.email=reg@example.com"])
        .args(args)
        .current_dir(dir);
    if let Some(epoch) = epoch {
        // Non-UTC offset on purpose: results must not depend on it.
        let date = format!("{epoch} +0530");
        cmd.env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date);
    }
    let out = cmd.output().expect("run git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

impl RegistryFixture {
    pub(crate) fn new() -> Self {
        let td = tempfile::tempdir().expect("tempdir");
        let upstream = td.path().join("upstream");
        fs::create_dir_all(&upstream).expect("mkdir upstream");
        run_git(&upstream, &["init", "-q"], None);
        Self { td, upstream }
    }

    pub(crate) fn root(&self) -> &Path {
        self.td.path()
    }

    pub(crate) fn url(&self) -> String {
        self.upstream.to_str().expect("utf8 path").to_string()
    }

    /// Write `text` as `package`'s manifest and commit it at `epoch`.
    pub(crate) fn commit_manifest(&self, package: &str, text: &str, epoch: i64) -> String {
        let first = package.chars().next().expect("non-empty").to_uppercase().to_string();
        self.commit_file(&format!("{first}/{package}/Versions.toml"), text, epoch)
    }

    pub(crate) fn commit_file(&self, rel: &str, text: &str, epoch: i64) -> String {
        let path = self.upstream.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, text).expect("write");
        run_git(&self.upstream, &["add", "-A"], None);
        run_git(&self.upstream, &["commit", "-q", "-m", rel], Some(epoch));
        run_git(&self.upstream, &["rev-parse", "HEAD"], None)
    }

    /// Run git in the upstream repository.
    pub(crate) fn git(&self, args: &[&str]) -> String {
        run_git(&self.upstream, args, None)
    }

    pub(crate) fn registry(&self) -> Registry {
        Registry {
            name: "Fixture".to_string(),
            url: self.url(),
            branch: None,
            issue_repo: None,
            default: true,
        }
    }

    pub(crate) fn depot(&self) -> PathBuf {
        self.td.path().join("depot")
    }

    pub(crate) fn settings(&self) -> Settings {
        let mut settings = Settings::for_registry(self.registry(), self.td.path().join("cache"));
        settings.depots = vec![self.depot()];
        settings.proposals_enabled = false;
        settings
    }
}
