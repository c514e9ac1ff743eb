// ── Rule publisher ──
//
// Installs a compiled generation as one full replace: every id in the
// reserved range is removed and the new set added in a single
// network-layer call. No incremental diff is computed.

use std::ops::RangeInclusive;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::MAX_RESERVED_RULE_IDS;
use crate::error::PublishError;
use crate::model::NetworkRule;
use crate::network::NetworkLayer;

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub rule_count: usize,
    /// The first attempt failed and the retry succeeded.
    pub retried: bool,
}

pub struct RulePublisher {
    network: Arc<dyn NetworkLayer>,
    reserved: u32,
    remove_ids: Vec<u32>,
}

impl RulePublisher {
    pub fn new(network: Arc<dyn NetworkLayer>, reserved_rule_ids: u32) -> Self {
        let reserved = reserved_rule_ids.min(MAX_RESERVED_RULE_IDS);
        if reserved < reserved_rule_ids {
            warn!(requested = reserved_rule_ids, reserved, "reserved rule id range capped");
        }
        Self {
            network,
            reserved,
            remove_ids: (1..=reserved).collect(),
        }
    }

    pub fn reserved_range(&self) -> RangeInclusive<u32> {
        1..=self.reserved
    }

    /// Replace the live generation with `rules`.
    ///
    /// A rejected batch leaves the layer in an unknown state, so the
    /// active rule count is read back for the log and the same full
    /// replace is retried once before giving up.
    pub async fn publish(&self, rules: &[NetworkRule]) -> Result<PublishReport, PublishError> {
        if let Some(bad) = rules.iter().find(|r| !self.reserved_range().contains(&r.id)) {
            return Err(PublishError::IdOutOfRange {
                id: bad.id,
                max: self.reserved,
            });
        }

        let first = match self.network.replace_rules(&self.remove_ids, rules).await {
            Ok(()) => {
                debug!(rule_count = rules.len(), "rule set published");
                return Ok(PublishReport {
                    rule_count: rules.len(),
                    retried: false,
                });
            }
            Err(e) => e,
        };

        let active_rules = self.network.active_rule_count().await.ok();
        warn!(error = %first, ?active_rules, "publish rejected, retrying once");

        match self.network.replace_rules(&self.remove_ids, rules).await {
            Ok(()) => Ok(PublishReport {
                rule_count: rules.len(),
                retried: true,
            }),
            Err(source) => Err(PublishError::Rejected {
                source,
                active_rules,
            }),
        }
    }
}
