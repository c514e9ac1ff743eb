// ── In-memory durable store ──
//
// For tests and for hosts that keep their own persistence and push edits
// in through `put_rule` / `remove_rule`.

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::{RwLock, broadcast};

use super::{CHANGE_CHANNEL_SIZE, DurableStore, StoreChange};
use crate::error::StoreError;
use crate::model::{DynamicSource, HeaderRuleEntry, RuleWriteBack};

#[derive(Default)]
struct Inner {
    rules: IndexMap<String, HeaderRuleEntry>,
    sources: Vec<DynamicSource>,
    setup_completed: bool,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_inner(Inner::default())
    }

    pub fn with_rules(rules: impl IntoIterator<Item = HeaderRuleEntry>) -> Self {
        Self::from_inner(Inner {
            rules: rules.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ..Inner::default()
        })
    }

    fn from_inner(inner: Inner) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            inner: RwLock::new(inner),
            changes,
        }
    }

    // ── Editing surface (UI side) ────────────────────────────────────

    /// Insert or replace an entry and notify subscribers.
    pub async fn put_rule(&self, entry: HeaderRuleEntry) {
        let id = entry.id.clone();
        self.inner.write().await.rules.insert(id.clone(), entry);
        self.notify(StoreChange::synced(vec![id]));
    }

    pub async fn remove_rule(&self, id: &str) -> Option<HeaderRuleEntry> {
        let removed = self.inner.write().await.rules.shift_remove(id);
        if removed.is_some() {
            self.notify(StoreChange::synced(vec![id.to_owned()]));
        }
        removed
    }

    pub async fn rule(&self, id: &str) -> Option<HeaderRuleEntry> {
        self.inner.read().await.rules.get(id).cloned()
    }

    pub async fn set_setup_completed(&self, done: bool) {
        self.inner.write().await.setup_completed = done;
        self.notify(StoreChange::local("setupCompleted"));
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load_rules(&self) -> Result<Vec<HeaderRuleEntry>, StoreError> {
        Ok(self.inner.read().await.rules.values().cloned().collect())
    }

    async fn update_rules(&self, updates: &[RuleWriteBack]) -> Result<usize, StoreError> {
        let mut written = Vec::new();
        {
            let mut inner = self.inner.write().await;
            for patch in updates {
                let Some(slot) = inner.rules.get_mut(&patch.id) else {
                    continue;
                };
                if slot.apply_write_back(patch) {
                    written.push(patch.id.clone());
                }
            }
        }
        let count = written.len();
        if count > 0 {
            self.notify(StoreChange::synced(written));
        }
        Ok(count)
    }

    async fn load_cached_sources(&self) -> Result<Vec<DynamicSource>, StoreError> {
        Ok(self.inner.read().await.sources.clone())
    }

    async fn save_cached_sources(&self, sources: &[DynamicSource]) -> Result<(), StoreError> {
        self.inner.write().await.sources = sources.to_vec();
        self.notify(StoreChange::local("sources"));
        Ok(())
    }

    async fn setup_completed(&self) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.setup_completed)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
