// ── Wire → domain conversion ──

use hdrsync_api::WireSource;

use crate::model::{DynamicSource, SourceType};

impl From<WireSource> for DynamicSource {
    fn from(w: WireSource) -> Self {
        Self {
            source_type: SourceType::from_wire(w.source_type.as_deref()),
            source_id: w.source_id,
            source_tag: w.source_tag.filter(|t| !t.is_empty()),
            source_path: w.source_path.filter(|p| !p.is_empty()),
            source_content: w.source_content,
        }
    }
}

/// Convert a whole wire snapshot, preserving order.
pub fn sources_from_wire(sources: Vec<WireSource>) -> Vec<DynamicSource> {
    sources.into_iter().map(DynamicSource::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_source_maps_type_and_drops_empty_metadata() {
        let wire = WireSource {
            source_id: "4".into(),
            source_type: Some("env".into()),
            source_tag: Some(String::new()),
            source_path: Some("API_TOKEN".into()),
            source_content: "t0k3n".into(),
        };

        let src = DynamicSource::from(wire);
        assert_eq!(src.source_type, SourceType::Env);
        assert_eq!(src.source_tag, None);
        assert_eq!(src.source_path.as_deref(), Some("API_TOKEN"));
        assert_eq!(src.source_content, "t0k3n");
    }
}
