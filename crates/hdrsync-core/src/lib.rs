// hdrsync-core: Dynamic rule synchronization engine between the companion
// client (hdrsync-api) and the host's network-interception layer.

pub mod bus;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod convert;
pub mod digest;
pub mod engine;
pub mod error;
pub mod model;
pub mod network;
pub mod publisher;
mod scheduler;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{BusMessage, MessageBus};
pub use compiler::{CompiledRuleSet, InvalidEntry, InvalidReason, ValueIssue, compile};
pub use config::{CompilerOptions, EngineConfig, MAX_RESERVED_RULE_IDS, Timings};
pub use connection::{
    Companion, CompanionSession, ConnectionEvent, ConnectionHandle, ConnectionManager,
    ConnectionState, RemoteCompanion,
};
pub use digest::{ChangeDigest, digest_rules, digest_sources, should_recompute};
pub use engine::{AppliedGeneration, Engine, EngineHandle, EngineStatus};
pub use error::{CoreError, NetworkError, PublishError, StoreError};
pub use network::{FileNetworkLayer, MemoryNetworkLayer, NetworkLayer, RuleFile};
pub use publisher::{PublishReport, RulePublisher};
pub use store::{DurableStore, FileStore, MemoryStore, SourceStore, StoreChange, StoreScope};

// Companion-side types that appear in this crate's public API.
pub use hdrsync_api::{ClientPlatform, CompanionEndpoint, ProbeOutcome, SnapshotKind};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Direction, DynamicSource, HeaderModification, HeaderRuleEntry, NetworkRule, ResourceType,
    RuleWriteBack, SourceType, ValueRepair, ValueSource,
};
