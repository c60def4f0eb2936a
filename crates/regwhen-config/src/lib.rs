//! Configuration file handling for regwhen.
//!
//! This crate loads `regwhen.toml`, validates it and merges it with CLI
//! overrides into a [`Settings`] value. The engine only ever sees
//! `Settings`; which registry is active is a field of that value, never
//! process-wide state.
//!
//! # Example
//!
//! ```ignore
//! use regwhen_config::{CliOverrides, Config};
//!
//! let config = Config::load(None)?;
//! let settings = config.build_settings(CliOverrides::default())?;
//! println!("querying {}", settings.registry.name);
//! ```

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regwhen_types::Registry;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default configuration file name
pub const CONFIG_FILE: &str = "regwhen.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "REGWHEN_CONFIG";

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "REGWHEN_CACHE_DIR";

/// Config file location: `$REGWHEN_CONFIG`, else `<config dir>/regwhen/regwhen.toml`
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("regwhen").join(CONFIG_FILE))
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*d).to_string())
}

/// Nested lock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Locks older than this are considered abandoned
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_stale_after")]
    pub stale_after: Duration,

    /// How long a refresh waits for another holder before giving up
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_lock_wait")]
    pub wait: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: default_stale_after(),
            wait: default_lock_wait(),
        }
    }
}

/// Nested batch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker threads for multi-package queries
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Nested issue-tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalsConfig {
    /// Look up open new-version proposals for each queried package
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProposalsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_stale_after() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_lock_wait() -> Duration {
    Duration::from_secs(120)
}

fn default_max_concurrent() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Contents of `regwhen.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the registry queries run against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,

    /// Root for mirrors and their lock files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Depots searched for the reference registry snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depots: Vec<PathBuf>,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub proposals: ProposalsConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<Registry>,
}

/// CLI overrides for merging with config file values.
///
/// `Option` fields mean "user did not pass this flag" when `None`.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub registry: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub max_concurrent: Option<usize>,
    pub no_proposals: bool,
}

/// Fully resolved settings threaded into every engine entry point
#[derive(Debug, Clone)]
pub struct Settings {
    pub registry: Registry,
    pub cache_dir: PathBuf,
    pub depots: Vec<PathBuf>,
    pub lock_stale_after: Duration,
    pub lock_wait: Duration,
    pub max_concurrent: usize,
    pub proposals_enabled: bool,
}

impl Settings {
    /// Settings for `registry` with defaults for everything else
    pub fn for_registry(registry: Registry, cache_dir: PathBuf) -> Self {
        Self {
            registry,
            cache_dir,
            depots: Vec::new(),
            lock_stale_after: default_stale_after(),
            lock_wait: default_lock_wait(),
            max_concurrent: default_max_concurrent(),
            proposals_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(&path)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration to `path`, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for reg in &self.registries {
            if reg.name.trim().is_empty() {
                bail!("registries[].name cannot be empty");
            }
            // The name becomes a path component under the cache and depots.
            if reg.name == "." || reg.name.contains(['/', '\\']) || reg.name.contains("..") {
                bail!(
                    "registry name '{}' must not contain '/', '\\' or '..'",
                    reg.name
                );
            }
            if reg.url.trim().is_empty() {
                bail!("registries[].url cannot be empty (registry '{}')", reg.name);
            }
            if !seen.insert(reg.name.as_str()) {
                bail!("registry '{}' is configured more than once", reg.name);
            }
        }

        let default_count = self.registries.iter().filter(|r| r.default).count();
        if default_count > 1 {
            bail!("only one registry can be marked as default");
        }

        if let Some(active) = &self.active {
            if self.find_by_name(active).is_none() {
                bail!("active registry '{active}' is not configured");
            }
        }

        if self.batch.max_concurrent == 0 {
            bail!("batch.max_concurrent must be greater than 0");
        }

        if self.lock.stale_after.is_zero() {
            bail!("lock.stale_after must be greater than 0");
        }

        Ok(())
    }

    /// All registries, with the built-in General registry when none are configured
    pub fn registries(&self) -> Vec<Registry> {
        if self.registries.is_empty() {
            vec![Registry::general()]
        } else {
            self.registries.clone()
        }
    }

    /// Find a registry by name
    pub fn find_by_name(&self, name: &str) -> Option<Registry> {
        self.registries().into_iter().find(|r| r.name == name)
    }

    /// The active registry: `active`, else the one marked default, else the first
    pub fn active_registry(&self) -> Result<Registry> {
        if let Some(active) = &self.active {
            return self
                .find_by_name(active)
                .with_context(|| format!("active registry '{active}' is not configured"));
        }
        let registries = self.registries();
        registries
            .iter()
            .find(|r| r.default)
            .or(registries.first())
            .cloned()
            .context("no registries configured")
    }

    /// Select `name` as the active registry
    pub fn set_active(&mut self, name: &str) -> Result<()> {
        if self.find_by_name(name).is_none() {
            let known: Vec<String> = self.registries().into_iter().map(|r| r.name).collect();
            bail!(
                "unknown registry '{name}' (configured: {})",
                known.join(", ")
            );
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Merge CLI overrides with config file values and the environment.
    pub fn build_settings(&self, cli: CliOverrides) -> Result<Settings> {
        let registry = match &cli.registry {
            Some(name) => self
                .find_by_name(name)
                .with_context(|| format!("unknown registry '{name}'"))?,
            None => self.active_registry()?,
        };

        let max_concurrent = cli.max_concurrent.unwrap_or(self.batch.max_concurrent);
        if max_concurrent == 0 {
            bail!("--jobs must be greater than 0");
        }

        Ok(Settings {
            registry,
            cache_dir: resolve_cache_dir(cli.cache_dir, self.cache_dir.clone())?,
            depots: if self.depots.is_empty() {
                default_depots()
            } else {
                self.depots.clone()
            },
            lock_stale_after: self.lock.stale_after,
            lock_wait: self.lock.wait,
            max_concurrent,
            proposals_enabled: self.proposals.enabled && !cli.no_proposals,
        })
    }
}

fn resolve_cache_dir(cli: Option<PathBuf>, file: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = cli {
        return Ok(dir);
    }
    if let Some(dir) = env::var_os(CACHE_DIR_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = file {
        return Ok(dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("regwhen"))
        .context("cannot determine a cache directory; set cache_dir or REGWHEN_CACHE_DIR")
}

/// Depots from `JULIA_DEPOT_PATH`, else `~/.julia`
pub fn default_depots() -> Vec<PathBuf> {
    if let Some(raw) = env::var_os("JULIA_DEPOT_PATH") {
        let depots: Vec<PathBuf> = env::split_paths(&raw)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !depots.is_empty() {
            return depots;
        }
    }
    dirs::home_dir()
        .map(|h| vec![h.join(".julia")])
        .unwrap_or_default()
}
