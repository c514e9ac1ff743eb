// ── Rule compiler ──
//
// Pure mapping from (rule entries, sources) to a compiled rule set. Bad
// entries never abort compilation: each is skipped or repaired and
// reported in `invalid`, and entries whose stored flags or values should
// change are collected in `updates` for a best-effort write-back.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexSet;

use crate::config::CompilerOptions;
use crate::model::{
    ALL_RESOURCE_TYPES, Direction, DynamicSource, HeaderModification, HeaderRuleEntry,
    NetworkRule, RuleWriteBack, ValueRepair, ValueSource,
};

const ELLIPSIS: &str = "...";

const CACHE_CONTROL: &str = "cache-control";
const CACHE_CONTROL_VALUE: &str = "no-cache, no-store, must-revalidate";
const PRAGMA: &str = "pragma";
const PRAGMA_VALUE: &str = "no-cache";

// ── Result types ─────────────────────────────────────────────────────

/// What was wrong with a header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueIssue {
    ControlCharacters,
    TooLong { len: usize, max: usize },
}

impl fmt::Display for ValueIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlCharacters => f.write_str("contains CR/LF/NUL"),
            Self::TooLong { len, max } => write!(f, "{len} chars exceeds limit of {max}"),
        }
    }
}

/// Why an entry was flagged during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Dynamic entry whose source is not in the current snapshot. Skipped.
    SourceMissing { source_id: String },
    /// Value was repaired and the sanitized form was emitted.
    Sanitized { issue: ValueIssue },
    /// Value could not be repaired. Skipped.
    InvalidValue { issue: ValueIssue },
    EmptyValue,
    InvalidHeaderName,
    NoDomains,
    /// Emitting the entry would overflow the reserved id range. Skipped.
    CapacityExceeded,
}

impl InvalidReason {
    /// Whether the entry still produced rules.
    pub fn is_emitted(&self) -> bool {
        matches!(self, Self::Sanitized { .. })
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceMissing { source_id } => write!(f, "source {source_id} missing"),
            Self::Sanitized { issue } => write!(f, "value sanitized ({issue})"),
            Self::InvalidValue { issue } => write!(f, "invalid value ({issue})"),
            Self::EmptyValue => f.write_str("empty value"),
            Self::InvalidHeaderName => f.write_str("invalid header name"),
            Self::NoDomains => f.write_str("no domains"),
            Self::CapacityExceeded => f.write_str("rule id range exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntry {
    pub id: String,
    pub reason: InvalidReason,
}

/// Output of one compilation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledRuleSet {
    pub rules: Vec<NetworkRule>,
    pub invalid: Vec<InvalidEntry>,
    /// Flag or sanitized-value changes to merge into the store.
    pub updates: Vec<RuleWriteBack>,
}

impl CompiledRuleSet {
    /// Flagged entry ids, each once, in compile order.
    pub fn invalid_entry_ids(&self) -> Vec<String> {
        self.invalid
            .iter()
            .map(|e| e.id.clone())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }
}

// ── Value validation ─────────────────────────────────────────────────

fn is_forbidden_char(c: char) -> bool {
    matches!(c, '\r' | '\n' | '\0')
}

/// Check a header value against the control-character and length rules.
/// Empty values pass here; callers decide what empty means.
pub fn validate_value(value: &str, max_len: usize) -> Result<(), ValueIssue> {
    if value.contains(is_forbidden_char) {
        return Err(ValueIssue::ControlCharacters);
    }
    let len = value.chars().count();
    if len > max_len {
        return Err(ValueIssue::TooLong { len, max: max_len });
    }
    Ok(())
}

/// Strip CR/LF/NUL and truncate to `max_len` chars including the ellipsis.
/// Applying it twice yields the same string.
pub fn sanitize_value(value: &str, max_len: usize) -> String {
    let cleaned: String = value.chars().filter(|c| !is_forbidden_char(*c)).collect();
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    let keep = max_len.saturating_sub(ELLIPSIS.len());
    let mut out: String = cleaned.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// RFC 7230 token characters.
fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Trimmed, non-blank, de-duplicated domains in authored order.
fn resolve_domains(entry: &HeaderRuleEntry) -> IndexSet<String> {
    entry
        .domains
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Compilation ──────────────────────────────────────────────────────

/// Compile rule entries against the current sources.
pub fn compile(
    entries: &[HeaderRuleEntry],
    sources: &[DynamicSource],
    opts: &CompilerOptions,
) -> CompiledRuleSet {
    let mut by_id: HashMap<&str, &DynamicSource> = HashMap::with_capacity(sources.len());
    for s in sources {
        by_id.entry(s.source_id.as_str()).or_insert(s);
    }

    let mut out = CompiledRuleSet::default();
    let mut next_id: u32 = 1;

    for entry in entries.iter().filter(|e| e.is_enabled) {
        let mut flag = |reason: InvalidReason| {
            out.invalid.push(InvalidEntry {
                id: entry.id.clone(),
                reason,
            });
        };

        // Resolve the raw value and what the stored flag should now be.
        let (raw, missing) = match &entry.value {
            ValueSource::Static { header_value } => (Some(header_value.clone()), false),
            ValueSource::Dynamic {
                source_id,
                prefix,
                suffix,
            } => match by_id.get(source_id.as_str()).filter(|_| !source_id.is_empty()) {
                Some(src) => (Some(format!("{prefix}{}{suffix}", src.source_content)), false),
                None => (None, true),
            },
        };

        let mut value_repair = None;

        let emitted = 'emit: {
            let Some(raw) = raw else {
                if let Some(source_id) = entry.value.source_id() {
                    flag(InvalidReason::SourceMissing {
                        source_id: source_id.to_owned(),
                    });
                }
                break 'emit None;
            };

            let name = entry.header_name.trim();
            if !is_valid_header_name(name) {
                flag(InvalidReason::InvalidHeaderName);
                break 'emit None;
            }

            let value = match validate_value(&raw, opts.max_value_len) {
                Ok(()) => raw,
                Err(issue) => {
                    let repaired = sanitize_value(&raw, opts.max_value_len);
                    if validate_value(&repaired, opts.max_value_len).is_err() {
                        flag(InvalidReason::InvalidValue { issue });
                        break 'emit None;
                    }
                    if repaired.is_empty() {
                        flag(InvalidReason::EmptyValue);
                        break 'emit None;
                    }
                    flag(InvalidReason::Sanitized { issue });
                    if let ValueSource::Static { header_value } = &entry.value {
                        value_repair = Some(ValueRepair {
                            original: header_value.clone(),
                            sanitized: repaired.clone(),
                        });
                    }
                    repaired
                }
            };
            if value.is_empty() {
                flag(InvalidReason::EmptyValue);
                break 'emit None;
            }

            let domains = resolve_domains(entry);
            if domains.is_empty() {
                flag(InvalidReason::NoDomains);
                break 'emit None;
            }

            let needed = u32::try_from(domains.len()).unwrap_or(u32::MAX);
            let last_id = next_id.saturating_add(needed - 1);
            if last_id > opts.reserved_rule_ids {
                flag(InvalidReason::CapacityExceeded);
                break 'emit None;
            }

            Some((name.to_ascii_lowercase(), value, domains))
        };

        if let Some((name, value, domains)) = emitted {
            let (request_headers, response_headers) =
                header_modifications(&name, &value, entry.direction, opts.cache_busting);

            for domain in domains {
                out.rules.push(NetworkRule {
                    id: next_id,
                    priority: opts.priority,
                    domain_filter: domain,
                    resource_types: ALL_RESOURCE_TYPES.to_vec(),
                    request_headers: request_headers.clone(),
                    response_headers: response_headers.clone(),
                });
                next_id = next_id.saturating_add(1);
            }
        }

        if missing != entry.source_missing || value_repair.is_some() {
            out.updates.push(RuleWriteBack {
                id: entry.id.clone(),
                source_missing: missing,
                value_repair,
            });
        }
    }

    out
}

/// The user's modification plus optional cache-busting response headers.
fn header_modifications(
    name: &str,
    value: &str,
    direction: Direction,
    cache_busting: bool,
) -> (Vec<HeaderModification>, Vec<HeaderModification>) {
    let user = HeaderModification::set(name, value);
    let (request, mut response) = match direction {
        Direction::Request => (vec![user], Vec::new()),
        Direction::Response => (Vec::new(), vec![user]),
    };

    if cache_busting {
        for (header, directive) in [(CACHE_CONTROL, CACHE_CONTROL_VALUE), (PRAGMA, PRAGMA_VALUE)] {
            if !response.iter().any(|m| m.header == header) {
                response.push(HeaderModification::set(header, directive));
            }
        }
    }

    (request, response)
}

// ── Tests ────────────────────────────────────────────────────────────
