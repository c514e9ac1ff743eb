// ── Compiled network rules ──
//
// The shape accepted by the host's network-interception layer: one rule
// per (entry, domain) pair, each carrying the header modifications it
// applies to matching requests or responses.

use serde::{Deserialize, Serialize};

/// Request categories a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    Ping,
    Media,
    #[serde(rename = "websocket")]
    WebSocket,
    Other,
}

/// Compiled rules apply to every resource type.
pub const ALL_RESOURCE_TYPES: [ResourceType; 12] = [
    ResourceType::MainFrame,
    ResourceType::SubFrame,
    ResourceType::Stylesheet,
    ResourceType::Script,
    ResourceType::Image,
    ResourceType::Font,
    ResourceType::Object,
    ResourceType::XmlHttpRequest,
    ResourceType::Ping,
    ResourceType::Media,
    ResourceType::WebSocket,
    ResourceType::Other,
];

/// The engine only ever overwrites header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderOperation {
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderModification {
    pub header: String,
    pub operation: HeaderOperation,
    pub value: String,
}

impl HeaderModification {
    pub fn set(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            operation: HeaderOperation::Set,
            value: value.into(),
        }
    }
}

/// One compiled rule. `id` is within the engine's reserved range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRule {
    pub id: u32,
    pub priority: u32,
    pub domain_filter: String,
    pub resource_types: Vec<ResourceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<HeaderModification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers: Vec<HeaderModification>,
}

impl NetworkRule {
    /// All header modifications in request-then-response order.
    pub fn modifications(&self) -> impl Iterator<Item = &HeaderModification> {
        self.request_headers.iter().chain(&self.response_headers)
    }

    /// Value this rule sets for `header` (case-insensitive), if any.
    pub fn value_for(&self, header: &str) -> Option<&str> {
        self.modifications()
            .find(|m| m.header.eq_ignore_ascii_case(header))
            .map(|m| m.value.as_str())
    }
}
