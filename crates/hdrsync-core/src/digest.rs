// ── Change detection digests ──
//
// Content digests over the inputs that affect compilation. Equal digests
// mean a recompute would produce the same rule set, so the engine skips
// it. Every field is length-prefixed so field boundaries cannot alias.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::model::{DynamicSource, HeaderRuleEntry, ValueSource};

/// SHA-256 over a canonical encoding of compile inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeDigest([u8; 32]);

impl ChangeDigest {
    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ChangeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeDigest({})", self.short())
    }
}

impl fmt::Display for ChangeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

struct Encoder(Sha256);

impl Encoder {
    fn new(domain: &[u8], count: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update((count as u64).to_le_bytes());
        Self(hasher)
    }

    fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    fn flag(&mut self, value: bool) -> &mut Self {
        self.0.update([u8::from(value)]);
        self
    }

    fn finish(self) -> ChangeDigest {
        ChangeDigest(self.0.finalize().into())
    }
}

/// Digest over `(source_id, source_content)` pairs in list order.
///
/// Metadata (type, tag, path) does not affect compiled output and is
/// excluded.
pub fn digest_sources(sources: &[DynamicSource]) -> ChangeDigest {
    let mut enc = Encoder::new(b"sources", sources.len());
    for s in sources {
        enc.field(s.source_id.as_bytes())
            .field(s.source_content.as_bytes());
    }
    enc.finish()
}

/// Digest over the semantic fields of rule entries.
///
/// `source_missing` and `tag` are excluded: the engine writes the former
/// itself, and neither changes compiled output.
pub fn digest_rules(entries: &[HeaderRuleEntry]) -> ChangeDigest {
    let mut enc = Encoder::new(b"rules", entries.len());
    for e in entries {
        enc.field(e.id.as_bytes())
            .field(e.header_name.as_bytes())
            .field(e.direction.to_string().as_bytes())
            .flag(e.is_enabled);

        match &e.value {
            ValueSource::Static { header_value } => {
                enc.flag(false).field(header_value.as_bytes());
            }
            ValueSource::Dynamic {
                source_id,
                prefix,
                suffix,
            } => {
                enc.flag(true)
                    .field(source_id.as_bytes())
                    .field(prefix.as_bytes())
                    .field(suffix.as_bytes());
            }
        }

        enc.0.update((e.domains.len() as u64).to_le_bytes());
        for d in &e.domains {
            enc.field(d.as_bytes());
        }
    }
    enc.finish()
}

/// True when `new` differs from the last observed digest (or none exists).
pub fn should_recompute(new: &ChangeDigest, previous: Option<&ChangeDigest>) -> bool {
    previous != Some(new)
}
