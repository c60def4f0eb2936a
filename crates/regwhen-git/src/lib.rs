//! Git plumbing for regwhen.
//!
//! Every operation here works on a bare repository (no working tree) and,
//! where it reads content, names the commit explicitly so callers can pin a
//! whole query to one tip even while another thread refreshes the mirror.
//!
//! # Example
//!
//! ```ignore
//! use regwhen_git::{clone_bare, resolve_commit, read_blob};
//! use std::path::Path;
//!
//! let mirror = Path::new("/tmp/General.git");
//! clone_bare("https://github.com/JuliaRegistries/General.git", mirror)?;
//! let tip = resolve_commit(mirror, "HEAD")?;
//! let text = read_blob(mirror, &tip, "E/Example/Versions.toml")?;
//! ```

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use regwhen_process::{CommandResult, run_command_in_dir_with_env};
use serde::{Deserialize, Serialize};

/// File whose presence marks a directory as a usable bare repository.
pub const BARE_MARKER: &str = "config";

/// A commit id paired with its commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStamp {
    pub id: String,
    pub time: DateTime<Utc>,
}

/// The git executable, overridable with `REGWHEN_GIT_BIN`.
pub fn git_program() -> String {
    env::var("REGWHEN_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

fn git(dir: &Path, args: &[&str]) -> Result<CommandResult> {
    // Never block on a credential prompt; an unreachable remote must fail fast.
    run_command_in_dir_with_env(
        &git_program(),
        args,
        dir,
        &[("GIT_TERMINAL_PROMPT", "0")],
    )
}

fn git_checked(dir: &Path, args: &[&str], what: &str) -> Result<String> {
    let out = git(dir, args)
        .with_context(|| format!("failed to execute git {what}; is git installed?"))?;
    if !out.success {
        bail!("git {what} failed: {}", out.stderr.trim());
    }
    Ok(out.stdout)
}

/// Whether `path` looks like a complete bare repository.
pub fn is_bare_repo(path: &Path) -> bool {
    path.join(BARE_MARKER).is_file()
}

/// Clone `url` into `dest` without a working tree.
///
/// `dest` must not exist yet; its parent is created if needed.
pub fn clone_bare(url: &str, dest: &Path) -> Result<()> {
    let parent = dest
        .parent()
        .with_context(|| format!("clone destination {} has no parent", dest.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create mirror parent dir {}", parent.display()))?;

    let dest_str = dest
        .to_str()
        .with_context(|| format!("clone destination {} is not valid UTF-8", dest.display()))?;
    git_checked(parent, &["clone", "--bare", "--quiet", url, dest_str], "clone")?;
    Ok(())
}

/// Fetch `branch` from `origin` and force-update the local branch ref to match.
pub fn fetch_branch(repo: &Path, branch: &str) -> Result<()> {
    let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
    git_checked(repo, &["fetch", "--quiet", "origin", &refspec], "fetch")?;
    Ok(())
}

/// The branch `HEAD` points at, if `HEAD` is symbolic.
pub fn head_branch(repo: &Path) -> Option<String> {
    let out = git(repo, &["symbolic-ref", "--short", "HEAD"]).ok()?;
    if !out.success {
        return None;
    }
    let branch = out.stdout.trim().to_string();
    if branch.is_empty() { None } else { Some(branch) }
}

/// Resolve a revision to a full commit id.
pub fn resolve_commit(repo: &Path, rev: &str) -> Result<String> {
    let spec = format!("{rev}^{{commit}}");
    let out = git_checked(repo, &["rev-parse", "--verify", "--quiet", &spec], "rev-parse")?;
    Ok(out.trim().to_string())
}

fn parse_epoch(raw: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid commit timestamp '{}'", raw.trim()))?;
    DateTime::from_timestamp(secs, 0)
        .with_context(|| format!("commit timestamp {secs} out of range"))
}

/// Commit time of `rev`, in UTC.
pub fn commit_time(repo: &Path, rev: &str) -> Result<DateTime<Utc>> {
    let out = git_checked(repo, &["log", "-1", "--format=%ct", rev], "log")?;
    parse_epoch(&out)
}

/// Whether `path` exists in the tree of `commit`.
pub fn path_exists(repo: &Path, commit: &str, path: &str) -> Result<bool> {
    let object = format!("{commit}:{path}");
    let out = git(repo, &["cat-file", "-e", &object]).context("failed to execute git cat-file")?;
    Ok(out.success)
}

/// Contents of `path` at `commit`, or `None` if the path is absent there.
pub fn read_blob(repo: &Path, commit: &str, path: &str) -> Result<Option<String>> {
    if !path_exists(repo, commit, path)? {
        return Ok(None);
    }
    let object = format!("{commit}:{path}");
    let out = git_checked(repo, &["cat-file", "blob", &object], "cat-file")?;
    Ok(Some(out))
}

/// Commits reachable from `commit` that changed the number of occurrences
/// of `needle` in `path`, oldest first.
pub fn pickaxe(repo: &Path, commit: &str, path: &str, needle: &str) -> Result<Vec<CommitStamp>> {
    let search = format!("-S{needle}");
    let out = git_checked(
        repo,
        &[
            "log",
            "--reverse",
            "--format=%H %ct",
            &search,
            commit,
            "--",
            path,
        ],
        "log -S",
    )?;

    out.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (id, ts) = line
                .trim()
                .split_once(' ')
                .with_context(|| format!("unexpected git log line '{line}'"))?;
            Ok(CommitStamp {
                id: id.to_string(),
                time: parse_epoch(ts)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::process::Command;

    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    fn run_git(dir: &Path, args: &[&str], date: Option<&str>) {
        let mut cmd = Command::new("git");
        cmd.args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir);
        if let Some(date) = date {
            cmd.env("GIT_AUTHOR_DATE", date).env("GIT_COMMITTER_DATE", date);
        }
        let out = cmd.output().expect("git");
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    }

    fn commit_file(dir: &Path, rel: &str, content: &str, date: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, content).expect("write");
        run_git(dir, &["add", "-A"], None);
        run_git(dir, &["commit", "-q", "-m", rel], Some(date));
    }

    fn upstream(root: &Path) -> PathBuf {
        let dir = root.join("upstream");
        fs::create_dir_all(&dir).expect("mkdir");
        run_git(&dir, &["init", "-q"], None);
        dir
    }

    #[test]
    fn clone_bare_creates_marker() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        commit_file(&up, "D/Demo/Versions.toml", "[\"0.1.0\"]\n", "1600000000 +0200");

        let mirror = td.path().join("cache/mirror");
        clone_bare(up.to_str().expect("utf8"), &mirror).expect("clone");
        assert!(is_bare_repo(&mirror));
        assert!(!mirror.join("D").exists());
    }

    #[test]
    fn clone_bare_fails_for_missing_source() {
        let td = tempdir().expect("tempdir");
        let mirror = td.path().join("mirror");
        let err = clone_bare(td.path().join("nope").to_str().expect("utf8"), &mirror)
            .expect_err("missing upstream");
        assert!(format!("{err:#}").contains("git clone failed"));
    }

    #[test]
    fn commit_time_is_utc_epoch() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        commit_file(&up, "a.txt", "a", "1600000000 +0530");

        let t = commit_time(&up, "HEAD").expect("time");
        assert_eq!(t.timestamp(), 1_600_000_000);
        assert_eq!(t.to_rfc3339(), "2020-09-13T12:26:40+00:00");
    }

    #[test]
    fn resolve_and_read_blob_at_commit() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        commit_file(&up, "D/Demo/Versions.toml", "first\n", "1600000000 +0000");
        let first = resolve_commit(&up, "HEAD").expect("rev");
        commit_file(&up, "D/Demo/Versions.toml", "second\n", "1600000100 +0000");

        assert_eq!(first.len(), 40);
        assert_eq!(
            read_blob(&up, &first, "D/Demo/Versions.toml").expect("read"),
            Some("first\n".to_string())
        );
        assert_eq!(
            read_blob(&up, "HEAD", "D/Demo/Versions.toml").expect("read"),
            Some("second\n".to_string())
        );
        assert_eq!(read_blob(&up, &first, "X/Missing/Versions.toml").expect("read"), None);
        assert!(!path_exists(&up, &first, "D/Demo/Package.toml").expect("exists"));
    }

    #[test]
    fn resolve_commit_fails_on_empty_repo() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        assert!(resolve_commit(&up, "HEAD").is_err());
        assert!(commit_time(&up, "HEAD").is_err());
    }

    #[test]
    fn pickaxe_returns_oldest_first() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        let rel = "D/Demo/Versions.toml";
        commit_file(&up, rel, "[\"0.1.0\"]\n", "1600000000 +0000");
        commit_file(&up, rel, "[\"0.1.0\"]\nyanked = true\n", "1600000100 +0000");
        commit_file(&up, rel, "[\"0.1.0\"]\nyanked = true\n\n[\"0.2.0\"]\n", "1600000200 +0000");

        let hits = pickaxe(&up, "HEAD", rel, "[\"0.1.0\"]").expect("pickaxe");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].time.timestamp(), 1_600_000_000);

        let hits = pickaxe(&up, "HEAD", rel, "[\"0.2.0\"]").expect("pickaxe");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].time.timestamp(), 1_600_000_200);

        assert!(pickaxe(&up, "HEAD", rel, "[\"9.9.9\"]").expect("pickaxe").is_empty());
    }

    #[test]
    fn fetch_branch_force_updates_ref() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        commit_file(&up, "a.txt", "1", "1600000000 +0000");
        let mirror = td.path().join("mirror");
        clone_bare(up.to_str().expect("utf8"), &mirror).expect("clone");

        commit_file(&up, "a.txt", "2", "1600000500 +0000");
        let branch = head_branch(&mirror).expect("symbolic HEAD");
        fetch_branch(&mirror, &branch).expect("fetch");

        assert_eq!(
            resolve_commit(&mirror, "HEAD").expect("mirror tip"),
            resolve_commit(&up, "HEAD").expect("upstream tip")
        );
        assert_eq!(commit_time(&mirror, "HEAD").expect("time").timestamp(), 1_600_000_500);
    }

    #[test]
    fn fetch_branch_reports_unreachable_remote() {
        let td = tempdir().expect("tempdir");
        let up = upstream(td.path());
        commit_file(&up, "a.txt", "1", "1600000000 +0000");
        let mirror = td.path().join("mirror");
        clone_bare(up.to_str().expect("utf8"), &mirror).expect("clone");
        fs::remove_dir_all(&up).expect("rm upstream");

        let err = fetch_branch(&mirror, "master").expect_err("remote gone");
        assert!(format!("{err:#}").contains("git fetch failed"));
    }

    #[cfg(not(windows))]
    fn write_fake_git(bin_dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = bin_dir.join("git");
        fs::write(&path, "#!/usr/bin/env sh\necho 'fatal: mock failure' >&2\nexit 128\n")
            .expect("write fake git");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[cfg(not(windows))]
    #[test]
    #[serial]
    fn git_program_override_is_used() {
        let td = tempdir().expect("tempdir");
        let fake = write_fake_git(td.path());

        temp_env::with_var("REGWHEN_GIT_BIN", Some(fake.to_str().expect("utf8")), || {
            assert_eq!(git_program(), fake.to_str().expect("utf8"));
            let err = resolve_commit(td.path(), "HEAD").expect_err("mock failure");
            assert!(format!("{err:#}").contains("fatal: mock failure"));
            assert!(head_branch(td.path()).is_none());
        });
    }

    #[test]
    #[serial]
    fn git_program_defaults_to_git() {
        temp_env::with_var_unset("REGWHEN_GIT_BIN", || {
            assert_eq!(git_program(), "git");
        });
    }
}
