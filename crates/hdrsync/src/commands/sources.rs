//! Cached source command handlers.

use tabled::Tabled;

use hdrsync_core::{DurableStore, DynamicSource};

use crate::cli::{GlobalOpts, SourcesArgs, SourcesCommand};
use crate::config;
use crate::error::CliError;
use crate::output;

const PREVIEW_CHARS: usize = 48;

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    source_type: String,
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Content")]
    content: String,
}

impl From<&DynamicSource> for SourceRow {
    fn from(s: &DynamicSource) -> Self {
        let mut content: String = s.source_content.chars().take(PREVIEW_CHARS).collect();
        if s.source_content.chars().count() > PREVIEW_CHARS {
            content.push('…');
        }
        Self {
            id: s.source_id.clone(),
            source_type: s.source_type.to_string(),
            tag: s.source_tag.clone().unwrap_or_default(),
            content,
        }
    }
}

pub async fn handle(args: SourcesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let store = config::open_store(&cfg).await?;

    match args.command {
        SourcesCommand::List => {
            let sources = store.load_cached_sources().await?;
            let out = output::render_list(
                &global.output,
                &sources,
                |s| SourceRow::from(s),
                |s| s.source_id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
