use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;

use regwhen_config::{CliOverrides, Config, Settings, default_config_path};
use regwhen_core::issues::{GhProposalSource, lookup_proposals};
use regwhen_core::{Mirror, QueryError, Reporter, query_batch};
use regwhen_types::{PackageRequest, Proposal, QueryResult};

#[derive(Parser, Debug)]
#[command(name = "regwhen", version)]
#[command(about = "When was a package version registered in a git-backed registry?")]
struct Cli {
    /// Config file (default: $REGWHEN_CONFIG, else <config dir>/regwhen/regwhen.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry to query instead of the active one.
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Mirror cache root (default: $REGWHEN_CACHE_DIR, else <cache dir>/regwhen)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Max concurrent queries for multi-package requests.
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Do not look up open registration proposals.
    #[arg(long, global = true)]
    no_proposals: bool,

    /// Print one JSON object per request.
    #[arg(long, global = true)]
    json: bool,

    /// Show progress messages.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show when package versions were registered (`Name` or `Name@version`).
    When {
        #[arg(required = true, value_name = "PKG[@VERSION]")]
        packages: Vec<String>,
    },
    /// Inspect and select registries.
    #[command(subcommand)]
    Registry(RegistryCommand),
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// Show the active registry and its mirror state.
    Show,
    /// List configured registries; the active one is marked with `*`.
    List,
    /// Make a registry the active one.
    Use { name: String },
    /// Refresh the mirror regardless of staleness.
    Refresh,
}

struct CliReporter {
    verbose: bool,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[info] {msg}");
        }
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut reporter = CliReporter {
        verbose: cli.verbose,
    };

    let config = Config::load(cli.config.as_deref())?;

    match &cli.cmd {
        Commands::When { packages } => {
            let settings = build_settings(&cli, &config)?;
            let ok = run_when(&settings, packages, cli.json, &mut reporter)?;
            return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
        Commands::Registry(RegistryCommand::Show) => {
            let settings = build_settings(&cli, &config)?;
            print_registry_show(&settings);
        }
        Commands::Registry(RegistryCommand::List) => {
            let settings = build_settings(&cli, &config)?;
            for reg in config.registries() {
                let marker = if reg.name == settings.registry.name { "*" } else { " " };
                println!("{marker} {} ({})", reg.name, reg.url);
            }
        }
        Commands::Registry(RegistryCommand::Use { name }) => {
            let path = cli
                .config
                .clone()
                .or_else(default_config_path)
                .context("cannot determine the config file location; pass --config")?;
            let mut config = config;
            config.set_active(name)?;
            config.save_to_file(&path)?;
            println!("active registry: {name}");
        }
        Commands::Registry(RegistryCommand::Refresh) => {
            let settings = build_settings(&cli, &config)?;
            run_refresh(&settings, &mut reporter)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_settings(cli: &Cli, config: &Config) -> Result<Settings> {
    config.build_settings(CliOverrides {
        registry: cli.registry.clone(),
        cache_dir: cli.cache_dir.clone(),
        max_concurrent: cli.jobs,
        no_proposals: cli.no_proposals,
    })
}

/// Returns whether every request succeeded.
fn run_when(
    settings: &Settings,
    packages: &[String],
    as_json: bool,
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    let requests = packages
        .iter()
        .map(|raw| {
            raw.parse::<PackageRequest>()
                .with_context(|| format!("invalid package request '{raw}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let results = query_batch(settings, &requests, reporter);
    let source = GhProposalSource;
    let now = Utc::now();
    let mut all_ok = true;

    for (request, result) in requests.iter().zip(results) {
        let proposals = if settings.proposals_enabled {
            lookup_proposals(&source, &settings.registry, &request.name, reporter)
        } else {
            Vec::new()
        };
        all_ok &= result.is_ok();

        if as_json {
            println!("{}", json_line(request, &result, &proposals));
        } else {
            println!("{}", render_result(request, &result, now));
            for p in &proposals {
                println!("{}", render_proposal(p, now));
            }
        }
    }

    Ok(all_ok)
}

fn json_line(
    request: &PackageRequest,
    result: &Result<QueryResult, QueryError>,
    proposals: &[Proposal],
) -> serde_json::Value {
    match result {
        Ok(res) => json!({
            "request": request.to_string(),
            "ok": true,
            "result": res,
            "proposals": proposals,
        }),
        Err(e) => json!({
            "request": request.to_string(),
            "ok": false,
            "error": { "kind": e.kind(), "message": e.to_string() },
            "proposals": proposals,
        }),
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Coarse age: the two most significant units, e.g. `3years 1month`.
fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0).unsigned_abs();
    let full = humantime::format_duration(std::time::Duration::from_secs(secs)).to_string();
    full.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

fn render_result(
    request: &PackageRequest,
    result: &Result<QueryResult, QueryError>,
    now: DateTime<Utc>,
) -> String {
    match result {
        Ok(res) => {
            let yanked = if res.yanked { " [yanked]" } else { "" };
            format!(
                "{}@{}: registered {} ({} ago){yanked}",
                res.package,
                res.version,
                format_time(res.registered_at),
                format_age(res.registered_at, now)
            )
        }
        Err(e) => format!("{request}: error: {e}"),
    }
}

fn render_proposal(p: &Proposal, now: DateTime<Utc>) -> String {
    let automerge = if p.is_automerge() { " [automerge]" } else { "" };
    format!(
        "  proposal #{}: {} by {}, opened {} ago{automerge}",
        p.id,
        p.title,
        p.author,
        format_age(p.created_at, now)
    )
}

fn print_registry_show(settings: &Settings) {
    let mirror = Mirror::new(settings);
    let reg = mirror.registry();
    let show = |t: Option<DateTime<Utc>>, missing: &str| {
        t.map(format_time).unwrap_or_else(|| missing.to_string())
    };

    println!("registry: {}", reg.name);
    println!("url: {}", reg.url);
    println!("branch: {}", mirror.branch());
    println!("mirror: {}", mirror.path().display());
    println!("mirror_updated: {}", show(mirror.last_update_time(), "never"));
    println!(
        "reference_updated: {}",
        show(mirror.reference().update_time(), "unknown")
    );
    println!("stale: {}", mirror.is_stale());
}

fn run_refresh(settings: &Settings, reporter: &mut dyn Reporter) -> Result<()> {
    let mirror = Mirror::new(settings);
    mirror.ensure(reporter)?;
    mirror
        .try_refresh()
        .with_context(|| format!("failed to refresh registry {}", settings.registry.name))?;
    let tip = mirror.tip()?;
    let updated = mirror
        .last_update_time()
        .map(format_time)
        .unwrap_or_else(|| "unknown".to_string());
    println!("{}: {} ({updated})", settings.registry.name, tip.commit);
    Ok(())
}
