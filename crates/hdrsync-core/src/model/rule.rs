// ── Header rule entries ──
//
// User-authored rule definitions as they live in the durable store. The
// stored JSON shape is flat (`headerValue`, `isDynamic`, `sourceId`, ...)
// and has accumulated aliases over time; `StoredRuleEntry` absorbs those
// and `HeaderRuleEntry` is what the rest of the crate works with.

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum::Display;

/// Which side of the exchange a rule modifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    #[default]
    Request,
    Response,
}

/// Where the header value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Static {
        header_value: String,
    },
    /// `prefix + source content + suffix`, resolved at compile time.
    Dynamic {
        source_id: String,
        prefix: String,
        suffix: String,
    },
}

impl ValueSource {
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Dynamic { source_id, .. } => Some(source_id),
            Self::Static { .. } => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }
}

/// A user-defined rule. Owned by the durable store; the engine only
/// writes back `source_missing` and sanitized static values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRuleEntry", into = "StoredRuleEntry")]
pub struct HeaderRuleEntry {
    pub id: String,
    pub header_name: String,
    pub direction: Direction,
    pub value: ValueSource,
    pub domains: IndexSet<String>,
    pub is_enabled: bool,
    pub tag: Option<String>,
    pub source_missing: bool,
    /// Fields this crate does not interpret, preserved across write-back.
    pub extra: Map<String, Value>,
}

impl HeaderRuleEntry {
    pub fn new_static(
        id: impl Into<String>,
        header_name: impl Into<String>,
        header_value: impl Into<String>,
    ) -> Self {
        Self::with_value(
            id,
            header_name,
            ValueSource::Static {
                header_value: header_value.into(),
            },
        )
    }

    pub fn new_dynamic(
        id: impl Into<String>,
        header_name: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self::with_value(
            id,
            header_name,
            ValueSource::Dynamic {
                source_id: source_id.into(),
                prefix: String::new(),
                suffix: String::new(),
            },
        )
    }

    fn with_value(id: impl Into<String>, header_name: impl Into<String>, value: ValueSource) -> Self {
        Self {
            id: id.into(),
            header_name: header_name.into(),
            direction: Direction::Request,
            value,
            domains: IndexSet::new(),
            is_enabled: true,
            tag: None,
            source_missing: false,
            extra: Map::new(),
        }
    }

    // ── Builder helpers ──────────────────────────────────────────────

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_affixes(mut self, new_prefix: impl Into<String>, new_suffix: impl Into<String>) -> Self {
        if let ValueSource::Dynamic { prefix, suffix, .. } = &mut self.value {
            *prefix = new_prefix.into();
            *suffix = new_suffix.into();
        }
        self
    }

    pub fn enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }

    /// Merge an engine write-back into this entry. Everything else the
    /// entry holds is left as stored. Returns whether anything changed.
    pub fn apply_write_back(&mut self, patch: &RuleWriteBack) -> bool {
        let before = (self.source_missing, self.value.clone());

        // A missing source only makes sense on a dynamic entry.
        if self.value.is_dynamic() || !patch.source_missing {
            self.source_missing = patch.source_missing;
        }
        if let (Some(repair), ValueSource::Static { header_value }) =
            (&patch.value_repair, &mut self.value)
        {
            // Skip if the value was edited since it was compiled.
            if *header_value == repair.original {
                header_value.clone_from(&repair.sanitized);
            }
        }

        before != (self.source_missing, self.value.clone())
    }
}

// ── Write-back ───────────────────────────────────────────────────────

/// A sanitized replacement for a static header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRepair {
    /// The value the repair was computed from.
    pub original: String,
    pub sanitized: String,
}

/// The fields the engine may change on a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWriteBack {
    pub id: String,
    pub source_missing: bool,
    pub value_repair: Option<ValueRepair>,
}

/// Apply write-backs to a list of entries by id. Returns the ids that
/// actually changed, in write-back order.
pub fn apply_write_backs(
    entries: &mut [HeaderRuleEntry],
    patches: &[RuleWriteBack],
) -> Vec<String> {
    let mut changed = Vec::new();
    for patch in patches {
        if let Some(entry) = entries.iter_mut().find(|e| e.id == patch.id) {
            if entry.apply_write_back(patch) {
                changed.push(patch.id.clone());
            }
        }
    }
    changed
}

// ── Stored JSON shape ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRuleEntry {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    header_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header_value: Option<String>,
    #[serde(default)]
    is_dynamic: bool,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suffix: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
    /// Single-domain field written by older versions.
    #[serde(default, skip_serializing)]
    domain: Option<String>,
    #[serde(default)]
    is_response: bool,
    #[serde(default = "default_true")]
    is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default)]
    source_missing: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl From<StoredRuleEntry> for HeaderRuleEntry {
    fn from(raw: StoredRuleEntry) -> Self {
        let mut extra = raw.extra;

        let value = match (raw.is_dynamic, raw.source_id) {
            (true, source_id) => {
                // Dynamic entries may carry a stale static value; keep it opaque.
                if let Some(stale) = raw.header_value {
                    extra.insert("headerValue".into(), Value::String(stale));
                }
                // No id resolves to no source, so the entry is flagged missing.
                ValueSource::Dynamic {
                    source_id: source_id.unwrap_or_default(),
                    prefix: raw.prefix.unwrap_or_default(),
                    suffix: raw.suffix.unwrap_or_default(),
                }
            }
            (false, source_id) => {
                if let Some(id) = source_id {
                    extra.insert("sourceId".into(), Value::String(id));
                }
                ValueSource::Static {
                    header_value: raw.header_value.unwrap_or_default(),
                }
            }
        };

        let mut domains: IndexSet<String> = raw.domains.into_iter().collect();
        if domains.is_empty() {
            domains.extend(raw.domain.filter(|d| !d.trim().is_empty()));
        }

        Self {
            id: raw.id,
            header_name: raw.header_name,
            direction: if raw.is_response {
                Direction::Response
            } else {
                Direction::Request
            },
            value,
            domains,
            is_enabled: raw.is_enabled,
            tag: raw.tag,
            source_missing: raw.source_missing,
            extra,
        }
    }
}

impl From<HeaderRuleEntry> for StoredRuleEntry {
    fn from(entry: HeaderRuleEntry) -> Self {
        let (is_dynamic, header_value, source_id, prefix, suffix) = match entry.value {
            ValueSource::Static { header_value } => (false, Some(header_value), None, None, None),
            ValueSource::Dynamic {
                source_id,
                prefix,
                suffix,
            } => (
                true,
                None,
                (!source_id.is_empty()).then_some(source_id),
                Some(prefix),
                Some(suffix),
            ),
        };

        Self {
            id: entry.id,
            header_name: entry.header_name,
            header_value,
            is_dynamic,
            source_id,
            prefix,
            suffix,
            domains: entry.domains.into_iter().collect(),
            domain: None,
            is_response: entry.direction == Direction::Response,
            is_enabled: entry.is_enabled,
            tag: entry.tag,
            source_missing: entry.source_missing,
            extra: entry.extra,
        }
    }
}

// ── Id helpers ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(serde_json::Number),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Num(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(StringOrNumber::into_string)
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(StringOrNumber::into_string))
}

// ── Tests ────────────────────────────────────────────────────────────
