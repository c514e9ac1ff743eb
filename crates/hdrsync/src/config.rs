//! CLI configuration: thin wrapper around `hdrsync_config`.
//!
//! Adds `--config` resolution and opens the on-disk stores the
//! configuration points at.

use std::path::PathBuf;

use hdrsync_core::{FileNetworkLayer, FileStore};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use hdrsync_config::{Config, load_config, save_config};

/// Config file in effect: `--config` / `HDRSYNC_CONFIG`, else the platform path.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(hdrsync_config::config_path)
}

/// Load and validate the effective configuration.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(load_config(Some(&config_file(global)))?)
}

pub async fn open_store(cfg: &Config) -> Result<FileStore, CliError> {
    Ok(FileStore::open(cfg.storage.store_dir()).await?)
}

pub async fn open_network(cfg: &Config) -> Result<FileNetworkLayer, CliError> {
    Ok(FileNetworkLayer::open(cfg.storage.rules_output_path()).await?)
}
