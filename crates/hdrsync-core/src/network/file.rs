// ── File-backed network layer ──
//
// Validates like the in-memory layer, then mirrors each installed
// generation to a JSON file that an external interceptor (proxy, browser
// extension host) can watch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{MemoryNetworkLayer, NetworkLayer};
use crate::error::NetworkError;
use crate::model::NetworkRule;
use crate::store::write_atomic;

/// On-disk shape of the live rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFile {
    pub updated_at: DateTime<Utc>,
    pub rules: Vec<NetworkRule>,
}

pub struct FileNetworkLayer {
    path: PathBuf,
    inner: MemoryNetworkLayer,
}

impl FileNetworkLayer {
    /// Load any existing rule file so `active_rule_count` is accurate
    /// after a restart.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, NetworkError> {
        let path = path.into();
        let inner = MemoryNetworkLayer::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<RuleFile>(&bytes) {
                Ok(file) => inner.replace_rules(&[], &file.rules).await?,
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable rule file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(NetworkError::Unavailable {
                    message: format!("{}: {e}", path.display()),
                });
            }
        }

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a rule file without opening a layer on it.
    pub async fn read(path: &Path) -> Result<Option<RuleFile>, NetworkError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| NetworkError::Unavailable {
                    message: format!("{}: {e}", path.display()),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NetworkError::Unavailable {
                message: format!("{}: {e}", path.display()),
            }),
        }
    }
}

#[async_trait]
impl NetworkLayer for FileNetworkLayer {
    async fn replace_rules(
        &self,
        remove_ids: &[u32],
        add_rules: &[NetworkRule],
    ) -> Result<(), NetworkError> {
        self.inner.replace_rules(remove_ids, add_rules).await?;

        let file = RuleFile {
            updated_at: Utc::now(),
            rules: self.inner.active_rules().to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| NetworkError::Rejected {
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| NetworkError::Unavailable {
                message: format!("{}: {e}", self.path.display()),
            })
    }

    async fn active_rule_count(&self) -> Result<usize, NetworkError> {
        self.inner.active_rule_count().await
    }
}
