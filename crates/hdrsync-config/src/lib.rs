//! Configuration for the hdrsync binary.
//!
//! A TOML file in the platform config dir, layered over built-in defaults
//! and `HDRSYNC_`-prefixed environment variables, then translated into
//! `hdrsync_core::EngineConfig`. The CLI adds flag-aware wrappers on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hdrsync_core::{
    ClientPlatform, CompanionEndpoint, CompilerOptions, EngineConfig, MAX_RESERVED_RULE_IDS,
    Timings,
};

/// Prefix for environment overrides, e.g. `HDRSYNC_COMPANION__PORT=6000`.
pub const ENV_PREFIX: &str = "HDRSYNC_";

const ELLIPSIS_LEN: usize = 3;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub companion: CompanionSection,

    #[serde(default)]
    pub timing: TimingSection,

    #[serde(default)]
    pub rules: RulesSection,

    #[serde(default)]
    pub storage: StorageSection,
}

/// Where the companion process listens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompanionSection {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub probe_path: String,
    /// `standard` or `upgrade-aware`.
    pub platform: ClientPlatform,
}

impl Default for CompanionSection {
    fn default() -> Self {
        let endpoint = CompanionEndpoint::default();
        Self {
            host: endpoint.host,
            port: endpoint.port,
            path: endpoint.path,
            probe_path: endpoint.probe_path,
            platform: ClientPlatform::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingSection {
    pub probe_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub debounce_ms: u64,
    pub liveness_interval_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        let t = Timings::default();
        Self {
            probe_timeout_ms: millis(t.probe_timeout),
            handshake_timeout_ms: millis(t.handshake_timeout),
            reconnect_delay_ms: millis(t.reconnect_delay),
            debounce_ms: millis(t.debounce),
            liveness_interval_secs: t.liveness_interval.as_secs(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesSection {
    pub max_value_length: usize,
    pub reserved_rule_ids: u32,
    pub cache_busting: bool,
    pub priority: u32,
}

impl Default for RulesSection {
    fn default() -> Self {
        let c = CompilerOptions::default();
        Self {
            max_value_length: c.max_value_len,
            reserved_rule_ids: c.reserved_rule_ids,
            cache_busting: c.cache_busting,
            priority: c.priority,
        }
    }
}

/// On-disk locations. Unset paths fall back to the platform data dir.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Where the file network layer writes the live rule set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_output: Option<PathBuf>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "hdrsync", "hdrsync")
}

fn home_fallback(segments: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    for s in segments {
        p.push(s);
    }
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "hdrsync", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory for the rule and source stores.
pub fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "hdrsync"]),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

impl StorageSection {
    pub fn store_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn rules_output_path(&self) -> PathBuf {
        self.rules_output
            .clone()
            .unwrap_or_else(|| self.store_dir().join("active-rules.json"))
    }
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `HDRSYNC_*` variables.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the config at `path` (or the canonical path).
/// A missing file is not an error; defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parents.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cfg.to_toml()?)?;
    Ok(())
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.companion.host.trim().is_empty() {
            return Err(ConfigError::invalid("companion.host", "must not be empty"));
        }
        if self.companion.port == 0 {
            return Err(ConfigError::invalid("companion.port", "must be non-zero"));
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.probe_timeout_ms", t.probe_timeout_ms),
            ("timing.handshake_timeout_ms", t.handshake_timeout_ms),
            ("timing.reconnect_delay_ms", t.reconnect_delay_ms),
            ("timing.debounce_ms", t.debounce_ms),
            ("timing.liveness_interval_secs", t.liveness_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be non-zero"));
            }
        }
        if t.debounce_ms >= t.liveness_interval_secs.saturating_mul(1000) {
            return Err(ConfigError::invalid(
                "timing.debounce_ms",
                "must be shorter than the liveness interval",
            ));
        }

        if !(1..=MAX_RESERVED_RULE_IDS).contains(&self.rules.reserved_rule_ids) {
            return Err(ConfigError::invalid(
                "rules.reserved_rule_ids",
                format!("must be between 1 and {MAX_RESERVED_RULE_IDS}"),
            ));
        }
        if self.rules.max_value_length <= ELLIPSIS_LEN {
            return Err(ConfigError::invalid(
                "rules.max_value_length",
                format!("must be greater than {ELLIPSIS_LEN}"),
            ));
        }
        Ok(())
    }

    /// Build the engine's runtime config.
    pub fn to_engine_config(&self) -> EngineConfig {
        let c = &self.companion;
        let t = &self.timing;
        EngineConfig {
            endpoint: CompanionEndpoint {
                host: c.host.clone(),
                port: c.port,
                path: c.path.clone(),
                probe_path: c.probe_path.clone(),
            },
            platform: c.platform,
            timings: Timings {
                probe_timeout: Duration::from_millis(t.probe_timeout_ms),
                handshake_timeout: Duration::from_millis(t.handshake_timeout_ms),
                reconnect_delay: Duration::from_millis(t.reconnect_delay_ms),
                debounce: Duration::from_millis(t.debounce_ms),
                liveness_interval: Duration::from_secs(t.liveness_interval_secs),
            },
            compiler: CompilerOptions {
                max_value_len: self.rules.max_value_length,
                reserved_rule_ids: self.rules.reserved_rule_ids,
                cache_busting: self.rules.cache_busting,
                priority: self.rules.priority,
            },
        }
    }
}
