//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use hdrsync_config::ConfigError;
use hdrsync_core::{CoreError, NetworkError, PublishError, StoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const STORE: i32 = 4;
    pub const PUBLISH: i32 = 5;
    pub const UNREACHABLE: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Companion ────────────────────────────────────────────────────

    #[error("Companion is not reachable at {url}")]
    #[diagnostic(
        code(hdrsync::unreachable),
        help(
            "Check that the companion process is running and listening.\n\
             Probe result: {outcome}\n\
             Adjust [companion] host/port in the config file if needed."
        )
    )]
    Unreachable { url: String, outcome: String },

    #[error("Could not connect to companion at {url}: {reason}")]
    #[diagnostic(code(hdrsync::connection_failed))]
    ConnectionFailed { url: String, reason: String },

    #[error("Timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(hdrsync::timeout),
        help("Increase the [timing] timeouts in the config file.")
    )]
    Timeout { timeout_ms: u64 },

    // ── Rules ────────────────────────────────────────────────────────

    #[error("Rule set was rejected by the network layer: {message}")]
    #[diagnostic(
        code(hdrsync::publish_failed),
        help("Run: hdrsync compile to see the rules that would be installed.")
    )]
    Publish { message: String },

    // ── Storage ──────────────────────────────────────────────────────

    #[error("Storage error: {message}")]
    #[diagnostic(
        code(hdrsync::store),
        help("Check [storage] dir in the config file and the files inside it.")
    )]
    Store { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hdrsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(hdrsync::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(hdrsync::config),
        help("Run: hdrsync config show to inspect the effective configuration.")
    )]
    Config(#[from] ConfigError),

    #[error("Engine stopped unexpectedly: {message}")]
    #[diagnostic(code(hdrsync::internal))]
    Internal { message: String },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(hdrsync::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),

    #[error("YAML rendering failed: {0}")]
    #[diagnostic(code(hdrsync::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } | Self::ConnectionFailed { .. } => exit_code::UNREACHABLE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Publish { .. } => exit_code::PUBLISH,
            Self::Store { .. } => exit_code::STORE,
            Self::Validation { .. } => exit_code::USAGE,
            Self::ConfigExists { .. } | Self::Config(_) => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Core errors → CliError ───────────────────────────────────────────

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

impl From<NetworkError> for CliError {
    fn from(err: NetworkError) -> Self {
        Self::Publish {
            message: err.to_string(),
        }
    }
}

impl From<PublishError> for CliError {
    fn from(err: PublishError) -> Self {
        Self::Publish {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CoreError::Store(e) => e.into(),
            CoreError::Publish(e) => e.into(),
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::EngineStopped => Self::Internal {
                message: "engine is not running".into(),
            },
            CoreError::Internal(message) => Self::Internal { message },
        }
    }
}
