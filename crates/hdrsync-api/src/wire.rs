// ── Companion wire format ──
//
// Inbound frames are JSON objects `{ "type": ..., "sources": [...] }`.
// Both message kinds carry the complete source list. Source objects come in
// two shapes (current `source*` names and legacy `location*` names); both
// are normalized into one `WireSource` here so nothing downstream ever sees
// the alias.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

// ── CompanionMessage ─────────────────────────────────────────────────

/// A decoded frame from the companion process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompanionMessage {
    /// Initial full snapshot sent right after the handshake.
    #[serde(rename = "sourcesInitial", alias = "snapshot")]
    Snapshot { sources: Vec<WireSource> },

    /// Subsequent snapshot after a source changed. Still a full list.
    #[serde(rename = "sourcesUpdated", alias = "update")]
    Update { sources: Vec<WireSource> },
}

impl CompanionMessage {
    pub fn kind(&self) -> SnapshotKind {
        match self {
            Self::Snapshot { .. } => SnapshotKind::Initial,
            Self::Update { .. } => SnapshotKind::Incremental,
        }
    }

    pub fn sources(&self) -> &[WireSource] {
        match self {
            Self::Snapshot { sources } | Self::Update { sources } => sources,
        }
    }

    pub fn into_sources(self) -> Vec<WireSource> {
        match self {
            Self::Snapshot { sources } | Self::Update { sources } => sources,
        }
    }
}

/// Which of the two message kinds delivered a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Initial,
    Incremental,
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<CompanionMessage, Error> {
    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.chars().take(256).collect(),
    })
}

// ── WireSource ───────────────────────────────────────────────────────

/// A dynamic source as published by the companion, alias-normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSource", rename_all = "camelCase")]
pub struct WireSource {
    pub source_id: String,
    pub source_type: Option<String>,
    pub source_tag: Option<String>,
    pub source_path: Option<String>,
    pub source_content: String,
}

/// Accepts both field generations; current names win when both appear.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    #[serde(default)]
    source_id: Option<IdValue>,
    #[serde(default)]
    location_id: Option<IdValue>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    location_type: Option<String>,
    #[serde(default)]
    source_tag: Option<String>,
    #[serde(default)]
    location_tag: Option<String>,
    #[serde(default)]
    source_path: Option<String>,
    #[serde(default)]
    location_path: Option<String>,
    #[serde(default)]
    source_content: Option<String>,
    #[serde(default)]
    location_content: Option<String>,
}

impl TryFrom<RawSource> for WireSource {
    type Error = String;

    fn try_from(raw: RawSource) -> Result<Self, Self::Error> {
        let source_id = raw
            .source_id
            .or(raw.location_id)
            .map(IdValue::into_string)
            .ok_or_else(|| "source without sourceId".to_owned())?;

        Ok(Self {
            source_id,
            source_type: raw.source_type.or(raw.location_type),
            source_tag: raw.source_tag.or(raw.location_tag),
            source_path: raw.source_path.or(raw.location_path),
            source_content: raw
                .source_content
                .or(raw.location_content)
                .unwrap_or_default(),
        })
    }
}

/// Ids arrive as strings from current companions and as numbers from old ones.
#[derive(Debug)]
struct IdValue(String);

impl IdValue {
    fn into_string(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for IdValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Either {
            Str(String),
            Num(serde_json::Number),
        }

        match Either::deserialize(deserializer)? {
            Either::Str(s) => Ok(Self(s)),
            Either::Num(n) => Ok(Self(n.to_string())),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_initial_snapshot() {
        let msg = decode_frame(
            r#"{"type":"sourcesInitial","sources":[{"sourceId":"1","sourceContent":"abc"}]}"#,
        )
        .unwrap();

        assert_eq!(msg.kind(), SnapshotKind::Initial);
        assert_eq!(msg.sources().len(), 1);
        assert_eq!(msg.sources()[0].source_id, "1");
        assert_eq!(msg.sources()[0].source_content, "abc");
    }

    #[test]
    fn decodes_short_type_aliases() {
        let snap = decode_frame(r#"{"type":"snapshot","sources":[]}"#).unwrap();
        let update = decode_frame(r#"{"type":"update","sources":[]}"#).unwrap();

        assert_eq!(snap.kind(), SnapshotKind::Initial);
        assert_eq!(update.kind(), SnapshotKind::Incremental);
    }

    #[test]
    fn legacy_location_fields_are_normalized() {
        let msg = decode_frame(
            r#"{"type":"sourcesUpdated","sources":[{
                "locationId": 7,
                "locationType": "file",
                "locationPath": "/tmp/token",
                "locationContent": "secret"
            }]}"#,
        )
        .unwrap();

        let src = &msg.sources()[0];
        assert_eq!(src.source_id, "7");
        assert_eq!(src.source_type.as_deref(), Some("file"));
        assert_eq!(src.source_path.as_deref(), Some("/tmp/token"));
        assert_eq!(src.source_content, "secret");
    }

    #[test]
    fn current_field_wins_over_legacy_alias() {
        let msg = decode_frame(
            r#"{"type":"update","sources":[{"sourceId":"new","locationId":"old","sourceContent":null}]}"#,
        )
        .unwrap();

        assert_eq!(msg.sources()[0].source_id, "new");
        assert_eq!(msg.sources()[0].source_content, "");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(decode_frame(r#"{"type":"ping"}"#).is_err());
    }

    #[test]
    fn source_without_id_is_rejected() {
        let err = decode_frame(r#"{"type":"update","sources":[{"sourceContent":"x"}]}"#);
        assert!(matches!(err, Err(Error::Deserialization { .. })));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(decode_frame("not json at all").is_err());
    }
}
