// ── Domain model ──
//
// Canonical types shared by the compiler, stores and engine. Rule entries
// and sources are the durable, user-facing shapes; `NetworkRule` is the
// compiled form handed to the network layer.

pub mod network_rule;
pub mod rule;
pub mod source;

// ── Re-exports ──────────────────────────────────────────────────────

pub use network_rule::{
    ALL_RESOURCE_TYPES, HeaderModification, HeaderOperation, NetworkRule, ResourceType,
};
pub use rule::{
    Direction, HeaderRuleEntry, RuleWriteBack, ValueRepair, ValueSource, apply_write_backs,
};
pub use source::{DynamicSource, SourceType};
