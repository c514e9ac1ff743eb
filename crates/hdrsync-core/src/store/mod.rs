// ── Persistence ──
//
// `DurableStore` is the engine's view of the host's storage: a synced
// scope holding rule entries (owned by the UI) and a local scope holding
// the last source snapshot and the onboarding flag. `SourceStore` is the
// engine's in-memory copy of the live source list.

mod file;
mod memory;
mod sources;

use async_trait::async_trait;
use strum::Display;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::model::{DynamicSource, HeaderRuleEntry, RuleWriteBack};

pub use file::FileStore;
pub(crate) use file::write_atomic;
pub use memory::MemoryStore;
pub use sources::SourceStore;

const CHANGE_CHANNEL_SIZE: usize = 64;

/// Storage area a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StoreScope {
    /// Rule entries, shared with the editing UI.
    Synced,
    /// Engine-private data (cached sources, setup flag).
    Local,
}

/// Notification that keys in a scope changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub scope: StoreScope,
    pub keys: Vec<String>,
}

impl StoreChange {
    pub fn synced(keys: Vec<String>) -> Self {
        Self {
            scope: StoreScope::Synced,
            keys,
        }
    }

    pub fn local(key: &str) -> Self {
        Self {
            scope: StoreScope::Local,
            keys: vec![key.to_owned()],
        }
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// All rule entries in stored order.
    async fn load_rules(&self) -> Result<Vec<HeaderRuleEntry>, StoreError>;

    /// Merge write-backs into the entries as currently stored. Unknown ids
    /// are ignored; the engine never creates or deletes entries. Returns
    /// how many entries changed.
    async fn update_rules(&self, updates: &[RuleWriteBack]) -> Result<usize, StoreError>;

    async fn load_cached_sources(&self) -> Result<Vec<DynamicSource>, StoreError>;

    async fn save_cached_sources(&self, sources: &[DynamicSource]) -> Result<(), StoreError>;

    /// Onboarding flag. Read-only from the engine's side.
    async fn setup_completed(&self) -> Result<bool, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}
