//! `run`: the long-lived sync engine.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use hdrsync_core::{
    BusMessage, Companion, DurableStore, Engine, NetworkLayer, RemoteCompanion,
};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let engine_config = cfg.to_engine_config();

    let store = config::open_store(&cfg).await?;
    let network = config::open_network(&cfg).await?;
    let companion = RemoteCompanion::new(&engine_config)?;
    info!(
        store = %store.dir().display(),
        rules_output = %network.path().display(),
        socket = %companion.socket_url(),
        "starting engine"
    );

    let engine = Engine::start(
        engine_config,
        Arc::new(store) as Arc<dyn DurableStore>,
        Arc::new(network) as Arc<dyn NetworkLayer>,
        Arc::new(companion) as Arc<dyn Companion>,
    );
    let mut bus = engine.handle().subscribe();
    let color = output::should_color(&global.color);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let result = loop {
        let message = tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                break Ok(());
            }
            message = bus.recv() => message,
        };

        let message = match message {
            Ok(message) => message,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "bus messages dropped");
                continue;
            }
            Err(RecvError::Closed) => break Ok(()),
        };

        match render_event(&message, &global.output, color) {
            Ok(line) => output::print_output(&line, global.quiet),
            Err(e) => break Err(e),
        }

        if args.once {
            match &*message {
                BusMessage::RulesApplied { .. } => break Ok(()),
                BusMessage::RuleUpdateError { error } => {
                    break Err(CliError::Publish {
                        message: error.clone(),
                    });
                }
                _ => {}
            }
        }
    };

    engine.shutdown().await;
    result
}

/// One line per bus message; structured formats emit one JSON object per line.
fn render_event(
    message: &BusMessage,
    format: &OutputFormat,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => Ok(serde_json::to_string(message)?),
        OutputFormat::Yaml => Ok(format!("---\n{}", serde_yaml::to_string(message)?)),
        OutputFormat::Table | OutputFormat::Plain => Ok(describe(message, color)),
    }
}

fn describe(message: &BusMessage, color: bool) -> String {
    match message {
        BusMessage::ConnectionStatus { connected: true } => {
            output::status_label("connected", true, color)
        }
        BusMessage::ConnectionStatus { connected: false } => {
            output::status_label("disconnected", false, color)
        }
        BusMessage::SourcesUpdated { sources } => {
            format!("sources updated ({} values)", sources.len())
        }
        BusMessage::RulesApplied {
            generation,
            rule_count,
            invalid_entry_ids,
        } => {
            let mut line = format!(
                "{} generation {generation}: {rule_count} rules",
                output::status_label("applied", true, color)
            );
            if !invalid_entry_ids.is_empty() {
                let _ = write!(line, ", flagged: {}", invalid_entry_ids.join(", "));
            }
            line
        }
        BusMessage::RuleUpdateError { error } => {
            format!("{} {error}", output::status_label("publish failed:", false, color))
        }
    }
}
