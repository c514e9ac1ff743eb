//! Rule entry command handlers.

use tabled::Tabled;

use hdrsync_core::{DurableStore, HeaderRuleEntry, ValueSource};

use crate::cli::{GlobalOpts, RulesArgs, RulesCommand};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct RuleEntryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Header")]
    header: String,
    #[tabled(rename = "Dir")]
    direction: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Domains")]
    domains: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&HeaderRuleEntry> for RuleEntryRow {
    fn from(e: &HeaderRuleEntry) -> Self {
        let value = match &e.value {
            ValueSource::Static { header_value } => header_value.clone(),
            ValueSource::Dynamic {
                source_id,
                prefix,
                suffix,
            } => format!("{prefix}{{source {source_id}}}{suffix}"),
        };
        let state = match (e.is_enabled, e.source_missing) {
            (false, _) => "disabled",
            (true, true) => "source missing",
            (true, false) => "ok",
        };
        Self {
            id: e.id.clone(),
            header: e.header_name.clone(),
            direction: e.direction.to_string(),
            value,
            domains: e.domains.iter().cloned().collect::<Vec<_>>().join(", "),
            state: state.into(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: RulesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let store = config::open_store(&cfg).await?;

    match args.command {
        RulesCommand::List => {
            let entries = store.load_rules().await?;
            let out = output::render_list(
                &global.output,
                &entries,
                |e| RuleEntryRow::from(e),
                |e| e.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        RulesCommand::Import { file } => {
            let body = tokio::fs::read_to_string(&file).await?;
            let entries: Vec<HeaderRuleEntry> = serde_json::from_str(&body)?;

            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = entries.iter().find(|e| !seen.insert(e.id.as_str())) {
                return Err(CliError::Validation {
                    field: "id".into(),
                    reason: format!("duplicate rule entry id '{}'", dup.id),
                });
            }

            store.replace_rules(&entries).await?;
            output::print_output(
                &format!(
                    "Imported {} rule entries into {}",
                    entries.len(),
                    store.rules_path().display()
                ),
                global.quiet,
            );
            Ok(())
        }
    }
}
