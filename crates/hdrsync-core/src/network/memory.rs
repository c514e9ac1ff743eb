// ── In-memory network layer ──

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::debug;

use super::NetworkLayer;
use crate::error::NetworkError;
use crate::model::NetworkRule;

/// Holds installed rules in memory and validates each batch the way a
/// real interception layer would: unique non-zero ids, non-empty
/// filters, at least one modification, and an optional quota.
pub struct MemoryNetworkLayer {
    rules: Mutex<BTreeMap<u32, NetworkRule>>,
    live: watch::Sender<Arc<Vec<NetworkRule>>>,
    quota: Option<usize>,
    replace_calls: AtomicU64,
}

impl MemoryNetworkLayer {
    pub fn new() -> Self {
        let (live, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            rules: Mutex::new(BTreeMap::new()),
            live,
            quota: None,
            replace_calls: AtomicU64::new(0),
        }
    }

    /// Reject batches that would leave more than `limit` rules installed.
    pub fn with_quota(mut self, limit: usize) -> Self {
        self.quota = Some(limit);
        self
    }

    /// Currently installed rules, ordered by id.
    pub fn active_rules(&self) -> Arc<Vec<NetworkRule>> {
        self.live.borrow().clone()
    }

    /// Observe each installed generation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<NetworkRule>>> {
        self.live.subscribe()
    }

    /// How many `replace_rules` calls were made, successful or not.
    pub fn replace_calls(&self) -> u64 {
        self.replace_calls.load(Ordering::Relaxed)
    }

    fn validate(rule: &NetworkRule) -> Result<(), NetworkError> {
        let invalid = |reason: &str| NetworkError::InvalidRule {
            id: rule.id,
            reason: reason.to_owned(),
        };
        if rule.id == 0 {
            return Err(invalid("id must be positive"));
        }
        if rule.domain_filter.trim().is_empty() {
            return Err(invalid("empty domain filter"));
        }
        if rule.modifications().next().is_none() {
            return Err(invalid("no header modifications"));
        }
        Ok(())
    }
}

impl Default for MemoryNetworkLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkLayer for MemoryNetworkLayer {
    async fn replace_rules(
        &self,
        remove_ids: &[u32],
        add_rules: &[NetworkRule],
    ) -> Result<(), NetworkError> {
        self.replace_calls.fetch_add(1, Ordering::Relaxed);

        let mut installed = self.rules.lock().await;
        let mut next = installed.clone();
        for id in remove_ids {
            next.remove(id);
        }
        for rule in add_rules {
            Self::validate(rule)?;
            if next.insert(rule.id, rule.clone()).is_some() {
                return Err(NetworkError::InvalidRule {
                    id: rule.id,
                    reason: "duplicate id".into(),
                });
            }
        }
        if let Some(limit) = self.quota {
            if next.len() > limit {
                return Err(NetworkError::QuotaExceeded {
                    limit,
                    requested: next.len(),
                });
            }
        }

        *installed = next;
        let snapshot: Vec<NetworkRule> = installed.values().cloned().collect();
        debug!(rule_count = snapshot.len(), "network rules replaced");
        self.live.send_replace(Arc::new(snapshot));
        Ok(())
    }

    async fn active_rule_count(&self) -> Result<usize, NetworkError> {
        Ok(self.rules.lock().await.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ALL_RESOURCE_TYPES, HeaderModification};

    fn rule(id: u32, domain: &str) -> NetworkRule {
        NetworkRule {
            id,
            priority: 1,
            domain_filter: domain.into(),
            resource_types: ALL_RESOURCE_TYPES.to_vec(),
            request_headers: vec![HeaderModification::set("x-a", "1")],
            response_headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replace_swaps_generation() {
        let layer = MemoryNetworkLayer::new();
        layer.replace_rules(&[], &[rule(1, "a.com"), rule(2, "b.com")]).await.unwrap();
        layer.replace_rules(&[1, 2, 3], &[rule(1, "c.com")]).await.unwrap();

        let active = layer.active_rules();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].domain_filter, "c.com");
        assert_eq!(layer.replace_calls(), 2);
    }

    #[tokio::test]
    async fn rejected_batch_leaves_state_unchanged() {
        let layer = MemoryNetworkLayer::new();
        layer.replace_rules(&[], &[rule(1, "a.com")]).await.unwrap();

        let err = layer
            .replace_rules(&[1], &[rule(1, "b.com"), rule(2, " ")])
            .await
            .unwrap_err();

        assert!(matches!(err, NetworkError::InvalidRule { id: 2, .. }));
        assert_eq!(layer.active_rules()[0].domain_filter, "a.com");
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let layer = MemoryNetworkLayer::new();
        let err = layer
            .replace_rules(&[], &[rule(1, "a.com"), rule(1, "b.com")])
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidRule { id: 1, .. }));
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let layer = MemoryNetworkLayer::new().with_quota(1);
        let err = layer
            .replace_rules(&[], &[rule(1, "a.com"), rule(2, "b.com")])
            .await
            .unwrap_err();

        assert_eq!(err, NetworkError::QuotaExceeded { limit: 1, requested: 2 });
        assert_eq!(layer.active_rule_count().await.unwrap(), 0);
    }
}
