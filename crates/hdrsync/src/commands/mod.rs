//! Command handlers.

pub mod compile;
pub mod config_cmd;
pub mod probe;
pub mod rules;
pub mod run;
pub mod sources;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(args, global).await,
        Command::Compile(args) => compile::handle(args, global).await,
        Command::Probe => probe::handle(global).await,
        Command::Rules(args) => rules::handle(args, global).await,
        Command::Sources(args) => sources::handle(args, global).await,
        Command::Config(args) => config_cmd::handle(args, global),
        Command::Completions(_) => unreachable!("handled before dispatch"),
    }
}
