// ── Message bus ──
//
// Fire-and-forget notifications for UI collaborators. Delivery is best
// effort: having no subscribers is normal, and slow subscribers lag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::DynamicSource;

const BUS_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BusMessage {
    SourcesUpdated {
        sources: Vec<DynamicSource>,
    },
    ConnectionStatus {
        connected: bool,
    },
    RuleUpdateError {
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    RulesApplied {
        generation: u64,
        rule_count: usize,
        invalid_entry_ids: Vec<String>,
    },
}

#[derive(Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<Arc<BusMessage>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn publish(&self, message: BusMessage) {
        if self.tx.send(Arc::new(message)).is_err() {
            trace!("bus message dropped, no listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        self.tx.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
