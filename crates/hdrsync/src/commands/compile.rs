//! `compile`: dry-run the rule compiler against stored rules.

use std::fmt::Write as _;

use serde::Serialize;
use tabled::Tabled;

use hdrsync_core::{DurableStore, DynamicSource, NetworkRule, compile};

use crate::cli::{CompileArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompileReport {
    source_count: usize,
    rules: Vec<NetworkRule>,
    invalid: Vec<InvalidRow>,
}

#[derive(Debug, Serialize, Tabled)]
struct InvalidRow {
    #[tabled(rename = "Entry")]
    id: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Emitted")]
    emitted: bool,
}

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "Response")]
    response: String,
}

impl From<&NetworkRule> for RuleRow {
    fn from(r: &NetworkRule) -> Self {
        let join = |mods: &[hdrsync_core::HeaderModification]| {
            mods.iter()
                .map(|m| format!("{}: {}", m.header, m.value))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Self {
            id: r.id,
            domain: r.domain_filter.clone(),
            request: join(&r.request_headers),
            response: join(&r.response_headers),
        }
    }
}

fn detail(report: &CompileReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} rules from {} sources",
        report.rules.len(),
        report.source_count
    );
    if !report.rules.is_empty() {
        let rows: Vec<RuleRow> = report.rules.iter().map(RuleRow::from).collect();
        let _ = writeln!(out, "{}", output::render_table(&rows));
    }
    if !report.invalid.is_empty() {
        let _ = writeln!(out, "Flagged entries:");
        let _ = write!(out, "{}", output::render_table(&report.invalid));
    }
    out.trim_end().to_owned()
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: CompileArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let store = config::open_store(&cfg).await?;

    let rules = store.load_rules().await?;
    let sources: Vec<DynamicSource> = match &args.sources {
        Some(path) => serde_json::from_str(&tokio::fs::read_to_string(path).await?)?,
        None => store.load_cached_sources().await?,
    };

    let compiled = compile(&rules, &sources, &cfg.to_engine_config().compiler);
    let report = CompileReport {
        source_count: sources.len(),
        invalid: compiled
            .invalid
            .iter()
            .map(|e| InvalidRow {
                id: e.id.clone(),
                reason: e.reason.to_string(),
                emitted: e.reason.is_emitted(),
            })
            .collect(),
        rules: compiled.rules,
    };

    let out = output::render_single(&global.output, &report, detail, |r| {
        r.rules
            .iter()
            .map(|rule| rule.id.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
