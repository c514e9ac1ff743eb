// ── Runtime engine configuration ──
//
// These types describe how the engine connects and compiles. They never
// touch disk: the CLI (via hdrsync-config) builds an `EngineConfig` and
// hands it in.

use std::time::Duration;

use hdrsync_api::{ClientPlatform, CompanionEndpoint};

/// Timers driving the connection manager, debouncer and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub probe_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Fixed delay before a reconnect attempt. There is no backoff.
    pub reconnect_delay: Duration,
    /// Quiet period that collapses bursts of triggers into one pass.
    pub debounce: Duration,
    pub liveness_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(5),
            debounce: Duration::from_millis(100),
            liveness_interval: Duration::from_secs(30),
        }
    }
}

/// Largest id range the engine will reserve in the network layer.
pub const MAX_RESERVED_RULE_IDS: u32 = 30_000;

/// Knobs for the rule compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Header value ceiling, in characters.
    pub max_value_len: usize,
    /// Upper bound of the engine's id range `1..=reserved_rule_ids`,
    /// capped at [`MAX_RESERVED_RULE_IDS`].
    pub reserved_rule_ids: u32,
    /// Attach no-cache response directives to every rule.
    pub cache_busting: bool,
    pub priority: u32,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_value_len: 1024,
            reserved_rule_ids: 1000,
            cache_busting: true,
            priority: 1,
        }
    }
}

/// Everything the engine needs to run.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub endpoint: CompanionEndpoint,
    pub platform: ClientPlatform,
    pub timings: Timings,
    pub compiler: CompilerOptions,
}
