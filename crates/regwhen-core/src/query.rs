//! The query orchestrator: "when was version V of package P registered".
//!
//! A query runs as a linear sequence of stages against one pinned tip:
//! ensure the mirror, locate the manifest, read and parse it, resolve the
//! specifier, then search history for the introducing commit. Batches share
//! one freshness check and one tip, and run individual queries on worker
//! threads in chunks of `max_concurrent`.

use std::any::Any;
use std::fmt;
use std::thread;

use regwhen_config::Settings;
use regwhen_types::{PackageRequest, QueryResult, Registry};

use crate::error::{QueryError, Result};
use crate::history::find_introduction;
use crate::manifest::{
    Manifest, locate_package, manifest_path, read_manifest_text, section_yanked,
};
use crate::mirror::{Mirror, TipSnapshot};
use crate::reporter::{BufferedReporter, Reporter};
use crate::resolve::resolve;

/// Stage of a single query, reported as it is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    MirrorEnsuring,
    LocatingPackage,
    ReadingManifest,
    Resolving,
    LocatingHistory,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStage::MirrorEnsuring => "ensuring mirror",
            QueryStage::LocatingPackage => "locating package",
            QueryStage::ReadingManifest => "reading manifest",
            QueryStage::Resolving => "resolving version",
            QueryStage::LocatingHistory => "searching history",
            QueryStage::Done => "done",
        };
        f.write_str(s)
    }
}

fn enter(reporter: &mut dyn Reporter, request: &PackageRequest, stage: QueryStage) {
    reporter.info(&format!("{request}: {stage}"));
}

/// Ensure the mirror is present and fresh, then pin its tip.
pub fn prepare(settings: &Settings, reporter: &mut dyn Reporter) -> Result<TipSnapshot> {
    let mirror = Mirror::new(settings);
    mirror.ensure_fresh(reporter)?;
    mirror.tip()
}

/// Run one query, refreshing the mirror first if it is stale.
pub fn query(
    settings: &Settings,
    request: &PackageRequest,
    reporter: &mut dyn Reporter,
) -> Result<QueryResult> {
    enter(reporter, request, QueryStage::MirrorEnsuring);
    let tip = prepare(settings, reporter)?;
    query_at(&tip, &settings.registry, request, reporter)
}

/// Run one query with every read pinned to `tip`.
pub fn query_at(
    tip: &TipSnapshot,
    registry: &Registry,
    request: &PackageRequest,
    reporter: &mut dyn Reporter,
) -> Result<QueryResult> {
    let package = request.name.as_str();

    enter(reporter, request, QueryStage::LocatingPackage);
    let path = locate_package(tip, package)?.ok_or_else(|| QueryError::PackageNotFound {
        package: package.to_string(),
        registry: registry.name.clone(),
    })?;

    enter(reporter, request, QueryStage::ReadingManifest);
    let text = read_manifest_text(tip, &registry.name, package, &path)?;
    let manifest = Manifest::parse(package, &text)?;

    enter(reporter, request, QueryStage::Resolving);
    let version = resolve(&manifest, &request.specifier)?;
    let yanked = section_yanked(&text, &version);

    enter(reporter, request, QueryStage::LocatingHistory);
    let stamp = find_introduction(tip, &path, package, &version)?;

    enter(reporter, request, QueryStage::Done);
    Ok(QueryResult {
        package: package.to_string(),
        version,
        registered_at: stamp.time,
        yanked,
        commit: stamp.id,
        tip: tip.commit.clone(),
    })
}

/// Run many queries against one pinned tip.
///
/// Results come back in request order. A failing request never affects its
/// siblings; only a mirror that cannot be prepared fails every request.
pub fn query_batch(
    settings: &Settings,
    requests: &[PackageRequest],
    reporter: &mut dyn Reporter,
) -> Vec<Result<QueryResult>> {
    if requests.is_empty() {
        return Vec::new();
    }

    let tip = match prepare(settings, reporter) {
        Ok(tip) => tip,
        Err(e) => return requests.iter().map(|_| Err(e.clone())).collect(),
    };

    let max_concurrent = settings.max_concurrent.clamp(1, requests.len());
    reporter.info(&format!(
        "querying {} package(s) at {} (max concurrent: {max_concurrent})",
        requests.len(),
        tip.commit
    ));

    let registry = &settings.registry;
    run_chunked(requests, max_concurrent, &tip, reporter, |request, buffered| {
        query_at(&tip, registry, request, buffered)
    })
}

/// Run `worker` over `requests` on scoped threads, `max_concurrent` at a time.
///
/// Each worker's messages are replayed in request order once its chunk is
/// joined. A worker that panics yields an error for its own request only.
fn run_chunked<F>(
    requests: &[PackageRequest],
    max_concurrent: usize,
    tip: &TipSnapshot,
    reporter: &mut dyn Reporter,
    worker: F,
) -> Vec<Result<QueryResult>>
where
    F: Fn(&PackageRequest, &mut BufferedReporter) -> Result<QueryResult> + Sync,
{
    let mut results = Vec::with_capacity(requests.len());
    for chunk in requests.chunks(max_concurrent.max(1)) {
        let outcomes: Vec<(Result<QueryResult>, BufferedReporter)> = thread::scope(|s| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|request| {
                    let worker = &worker;
                    s.spawn(move || {
                        let mut buffered = BufferedReporter::default();
                        let result = worker(request, &mut buffered);
                        (result, buffered)
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(chunk)
                .map(|(handle, request)| match handle.join() {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let mut buffered = BufferedReporter::default();
                        let detail = format!("query worker panicked: {}", panic_message(&*payload));
                        buffered.error(&format!("{request}: {detail}"));
                        let path = manifest_path(&request.name)
                            .unwrap_or_else(|| request.name.clone());
                        let err = QueryError::ManifestUnreadable {
                            path,
                            commit: tip.commit.clone(),
                            detail,
                        };
                        (Err(err), buffered)
                    }
                })
                .collect()
        });

        for (result, buffered) in outcomes {
            buffered.replay(reporter);
            results.push(result);
        }
    }
    results
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use regwhen_types::VersionSpecifier;

    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::test_support::RegistryFixture;

    const T1: i64 = 1_600_000_000;
    const T2: i64 = 1_600_500_000;
    const T3: i64 = 1_601_000_000;

    fn at(epoch: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(epoch, 0).single().expect("valid epoch")
    }

    fn req(s: &str) -> PackageRequest {
        s.parse().expect("request")
    }

    /// Demo: 0.1.0 at T1, yanked at T2, 0.2.0 added at T3.
    fn demo_registry() -> (RegistryFixture, [String; 3]) {
        let fx = RegistryFixture::new();
        let a = fx.commit_manifest("Demo", "[\"0.1.0\"]\ngit-tree-sha1 = \"aaaa\"\n", T1);
        let b = fx.commit_manifest(
            "Demo",
            "[\"0.1.0\"]\ngit-tree-sha1 = \"aaaa\"\nyanked = true\n",
            T2,
        );
        let c = fx.commit_manifest(
            "Demo",
            "[\"0.1.0\"]\ngit-tree-sha1 = \"aaaa\"\nyanked = true\n\n[\"0.2.0\"]\ngit-tree-sha1 = \"bbbb\"\n",
            T3,
        );
        (fx, [a, b, c])
    }

    #[test]
    fn latest_resolves_to_newest_entry() {
        let (fx, [_, _, c]) = demo_registry();
        let mut rep = CollectingReporter::default();
        let res = query(&fx.settings(), &req("Demo"), &mut rep).expect("query");
        assert_eq!(res.package, "Demo");
        assert_eq!(res.version, "0.2.0");
        assert_eq!(res.registered_at, at(T3));
        assert!(!res.yanked);
        assert_eq!(res.commit, c);
        assert_eq!(res.tip, c);
        assert!(rep.warns.is_empty(), "warnings: {:?}", rep.warns);
    }

    #[test]
    fn yanked_version_reports_introduction_not_yank() {
        let (fx, [a, _, c]) = demo_registry();
        let mut rep = CollectingReporter::default();
        let res = query(&fx.settings(), &req("Demo@0.1.0"), &mut rep).expect("query");
        assert_eq!(res.version, "0.1.0");
        assert_eq!(res.registered_at, at(T1));
        assert!(res.yanked);
        assert_eq!(res.commit, a);
        assert_eq!(res.tip, c);
    }

    #[test]
    fn unknown_version_is_not_found() {
        let (fx, _) = demo_registry();
        let mut rep = CollectingReporter::default();
        let err = query(&fx.settings(), &req("Demo@0.3.0"), &mut rep).expect_err("missing");
        assert!(matches!(err, QueryError::VersionNotFound { ref specifier, .. } if specifier == "0.3.0"));
    }

    #[test]
    fn partial_specifier_with_only_yanked_matches_is_not_found() {
        let (fx, _) = demo_registry();
        let mut rep = CollectingReporter::default();
        let err = query(&fx.settings(), &req("Demo@0.1"), &mut rep).expect_err("all yanked");
        assert_eq!(err.kind(), "version_not_found");

        let res = query(&fx.settings(), &req("Demo@0.2"), &mut rep).expect("partial");
        assert_eq!(res.version, "0.2.0");
    }

    #[test]
    fn unknown_package_is_not_found() {
        let (fx, _) = demo_registry();
        let mut rep = CollectingReporter::default();
        let err = query(&fx.settings(), &req("Nope"), &mut rep).expect_err("missing");
        assert_eq!(
            err,
            QueryError::PackageNotFound {
                package: "Nope".to_string(),
                registry: "Fixture".to_string(),
            }
        );
    }

    #[test]
    fn empty_manifest_has_no_versions() {
        let (fx, _) = demo_registry();
        fx.commit_manifest("Empty", "# no sections yet\n", T3 + 10);
        let mut rep = CollectingReporter::default();
        let err = query(&fx.settings(), &req("Empty"), &mut rep).expect_err("empty");
        assert_eq!(err.kind(), "no_versions_found");
    }

    #[test]
    fn stage_messages_go_to_reporter_in_order() {
        let (fx, _) = demo_registry();
        let mut rep = CollectingReporter::default();
        query(&fx.settings(), &req("Demo"), &mut rep).expect("query");
        let stages: Vec<&String> = rep
            .infos
            .iter()
            .filter(|m| m.starts_with("Demo: "))
            .collect();
        assert_eq!(stages.first().map(|s| s.as_str()), Some("Demo: ensuring mirror"));
        assert_eq!(stages.last().map(|s| s.as_str()), Some("Demo: done"));
        assert_eq!(stages.len(), 6);
    }

    #[test]
    fn unreachable_registry_is_mirror_unavailable() {
        let fx = RegistryFixture::new();
        let mut settings = fx.settings();
        settings.registry.url = fx.root().join("gone").display().to_string();
        let mut rep = CollectingReporter::default();
        let err = query(&settings, &req("Demo"), &mut rep).expect_err("no mirror");
        assert_eq!(err.kind(), "mirror_unavailable");
    }

    #[test]
    fn batch_keeps_order_and_isolates_failures() {
        let (fx, _) = demo_registry();
        fx.commit_manifest("Other", "[\"1.0.0\"]\n", T3 + 100);
        let mut settings = fx.settings();
        settings.max_concurrent = 2;

        let requests = vec![
            req("Demo"),
            req("Nope"),
            req("Demo@0.1.0"),
            req("Other@1"),
            req("Demo@9"),
        ];
        let mut rep = CollectingReporter::default();
        let results = query_batch(&settings, &requests, &mut rep);
        assert_eq!(results.len(), requests.len());

        assert_eq!(results[0].as_ref().expect("demo").version, "0.2.0");
        assert_eq!(results[1].as_ref().expect_err("nope").kind(), "package_not_found");
        assert!(results[2].as_ref().expect("demo 0.1.0").yanked);
        let other = results[3].as_ref().expect("other");
        assert_eq!(other.version, "1.0.0");
        assert_eq!(other.registered_at, at(T3 + 100));
        assert_eq!(results[4].as_ref().expect_err("demo 9").kind(), "version_not_found");

        // All results share one pinned tip.
        let tips: Vec<&str> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|r| r.tip.as_str())
            .collect();
        assert!(tips.windows(2).all(|w| w[0] == w[1]));

        // Worker messages are replayed in request order.
        let done: Vec<&String> = rep.infos.iter().filter(|m| m.ends_with(": done")).collect();
        assert_eq!(done, vec!["Demo: done", "Demo@0.1.0: done", "Other@1: done"]);
    }

    #[test]
    fn batch_fails_every_request_without_a_mirror() {
        let fx = RegistryFixture::new();
        let mut settings = fx.settings();
        settings.registry.url = fx.root().join("gone").display().to_string();
        let mut rep = CollectingReporter::default();
        let results = query_batch(&settings, &[req("A"), req("B")], &mut rep);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(QueryError::MirrorUnavailable { .. }))));
    }

    #[test]
    fn empty_batch_touches_nothing() {
        let fx = RegistryFixture::new();
        let settings = fx.settings();
        let mut rep = CollectingReporter::default();
        assert!(query_batch(&settings, &[], &mut rep).is_empty());
        assert!(!settings.cache_dir.exists());
    }

    #[test]
    fn query_at_uses_the_given_registry_name() {
        let (fx, _) = demo_registry();
        let settings = fx.settings();
        let tip = prepare(&settings, &mut CollectingReporter::default()).expect("tip");
        let request = PackageRequest::new("Ghost", VersionSpecifier::Latest);
        let err = query_at(&tip, &settings.registry, &request, &mut CollectingReporter::default())
            .expect_err("ghost");
        assert!(err.to_string().contains("registry 'Fixture'"));
    }

    #[test]
    fn panicking_worker_fails_only_its_own_request() {
        let tip = TipSnapshot {
            mirror: "unused".into(),
            commit: "c0ffee".to_string(),
        };
        let requests = vec![req("Alpha"), req("Boom"), req("Gamma")];
        let mut rep = CollectingReporter::default();

        let results = run_chunked(&requests, 3, &tip, &mut rep, |request, buffered| {
            buffered.info(&format!("{request}: started"));
            if request.name == "Boom" {
                panic!("manifest exploded");
            }
            Ok(QueryResult {
                package: request.name.clone(),
                version: "1.0.0".to_string(),
                registered_at: at(T1),
                yanked: false,
                commit: "c0ffee".to_string(),
                tip: "c0ffee".to_string(),
            })
        });

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().expect("alpha").package, "Alpha");
        assert_eq!(results[2].as_ref().expect("gamma").package, "Gamma");
        let err = results[1].as_ref().expect_err("boom");
        assert_eq!(err.kind(), "manifest_unreadable");
        assert_eq!(
            err.to_string(),
            "cannot read B/Boom/Versions.toml at c0ffee: query worker panicked: manifest exploded"
        );
        assert_eq!(rep.infos, vec!["Alpha: started", "Gamma: started"]);
        assert_eq!(rep.errors, vec!["Boom: query worker panicked: manifest exploded"]);
    }
}
