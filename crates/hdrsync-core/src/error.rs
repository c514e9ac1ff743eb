// ── Core error types ──
//
// Engine-facing errors. Connectivity failures never surface as hard
// errors from the engine (they become connection states); these types
// describe store, publish and configuration failures, plus the
// `From<hdrsync_api::Error>` translation for the connection path.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach companion at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Companion connection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Store / network layer errors ─────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Engine is not running")]
    EngineStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hdrsync_api::Error> for CoreError {
    fn from(err: hdrsync_api::Error) -> Self {
        match err {
            hdrsync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        url: e.url().map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            hdrsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid companion URL: {e}"),
            },
            hdrsync_api::Error::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            hdrsync_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            hdrsync_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            hdrsync_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Frame decoding error: {message}"))
            }
        }
    }
}

// ── Durable store ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store data is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}

// ── Network layer ────────────────────────────────────────────────────

/// Rejection reported by the host's network-interception layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("rule {id} is invalid: {reason}")]
    InvalidRule { id: u32, reason: String },

    #[error("rule quota exceeded: {requested} rules requested, limit is {limit}")]
    QuotaExceeded { limit: usize, requested: usize },

    #[error("network layer rejected the batch: {message}")]
    Rejected { message: String },

    #[error("network layer unavailable: {message}")]
    Unavailable { message: String },
}

// ── Publisher ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("rule id {id} is outside the reserved range 1..={max}")]
    IdOutOfRange { id: u32, max: u32 },

    #[error("publish failed after retry: {source}")]
    Rejected {
        #[source]
        source: NetworkError,
        /// Active rule count read back after the first failure, if readable.
        active_rules: Option<usize>,
    },
}
