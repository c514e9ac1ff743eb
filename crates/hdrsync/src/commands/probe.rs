//! `probe`: one reachability check against the companion.

use serde::Serialize;

use hdrsync_core::{Companion, RemoteCompanion};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeReport {
    url: String,
    outcome: String,
    reachable: bool,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let companion = RemoteCompanion::new(&cfg.to_engine_config())?;

    let outcome = companion.probe().await;
    let report = ProbeReport {
        url: companion.probe_url().to_string(),
        outcome: outcome.to_string(),
        reachable: outcome.permits_connect(),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| {
            let label = if r.reachable { "reachable" } else { "unreachable" };
            format!(
                "{} {} ({})",
                output::status_label(label, r.reachable, color),
                r.url,
                r.outcome
            )
        },
        |r| r.outcome.clone(),
    )?;
    output::print_output(&out, global.quiet);

    if report.reachable {
        Ok(())
    } else {
        Err(CliError::Unreachable {
            url: report.url,
            outcome: report.outcome,
        })
    }
}
