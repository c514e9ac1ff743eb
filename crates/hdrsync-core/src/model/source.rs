// ── Dynamic source domain types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where a source's value comes from. Informational only.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourceType {
    Http,
    File,
    Env,
    #[default]
    Other,
}

impl SourceType {
    /// Lenient parse: unrecognized or missing kinds become `Other`.
    pub fn from_wire(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
    }
}

/// A named value supplied by the companion process.
///
/// Identity is `source_id`; an empty `source_content` is a legitimate
/// value (the companion reports failures this way).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSource {
    pub source_id: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default)]
    pub source_content: String,
}

impl DynamicSource {
    pub fn new(source_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_type: SourceType::Other,
            source_tag: None,
            source_path: None,
            source_content: content.into(),
        }
    }
}
