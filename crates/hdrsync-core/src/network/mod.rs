// ── Network-interception layer ──
//
// The host-side sink for compiled rules. `replace_rules` is the only
// mutation the engine performs and is atomic per call: either the whole
// batch (removals plus additions) lands or nothing changes.

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::NetworkError;
use crate::model::NetworkRule;

pub use file::{FileNetworkLayer, RuleFile};
pub use memory::MemoryNetworkLayer;

#[async_trait]
pub trait NetworkLayer: Send + Sync {
    /// Remove `remove_ids` and add `add_rules` in one atomic step.
    async fn replace_rules(
        &self,
        remove_ids: &[u32],
        add_rules: &[NetworkRule],
    ) -> Result<(), NetworkError>;

    /// Number of rules currently installed.
    async fn active_rule_count(&self) -> Result<usize, NetworkError>;
}
