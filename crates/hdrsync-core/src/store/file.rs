// ── File-backed durable store ──
//
// Two JSON documents in one directory:
//   rules.json  : synced scope, an array of rule entries
//   local.json  : local scope, `{ "sources": [...], "setupCompleted": bool }`
//
// Writes go through a temp file + rename. Only writes made through this
// instance raise change notifications; edits by other processes are
// picked up by the liveness tick.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use super::{CHANGE_CHANNEL_SIZE, DurableStore, StoreChange};
use crate::error::StoreError;
use crate::model::{DynamicSource, HeaderRuleEntry, RuleWriteBack, apply_write_backs};

const RULES_FILE: &str = "rules.json";
const LOCAL_FILE: &str = "local.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalDoc {
    #[serde(default)]
    sources: Vec<DynamicSource>,
    #[serde(default)]
    setup_completed: bool,
}

pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            changes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rules_path(&self) -> PathBuf {
        self.dir.join(RULES_FILE)
    }

    pub fn local_path(&self) -> PathBuf {
        self.dir.join(LOCAL_FILE)
    }

    /// Replace the whole rule list (import). Notifies every id involved.
    pub async fn replace_rules(&self, entries: &[HeaderRuleEntry]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut keys: Vec<String> = read_json::<Vec<HeaderRuleEntry>>(&self.rules_path())
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.id)
            .collect();
        keys.extend(entries.iter().map(|e| e.id.clone()));
        keys.sort();
        keys.dedup();

        write_json(&self.rules_path(), &entries).await?;
        let _ = self.changes.send(StoreChange::synced(keys));
        Ok(())
    }

    pub async fn set_setup_completed(&self, done: bool) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_local().await?;
        doc.setup_completed = done;
        write_json(&self.local_path(), &doc).await?;
        let _ = self.changes.send(StoreChange::local("setupCompleted"));
        Ok(())
    }

    async fn read_local(&self) -> Result<LocalDoc, StoreError> {
        Ok(read_json(&self.local_path()).await?.unwrap_or_default())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load_rules(&self) -> Result<Vec<HeaderRuleEntry>, StoreError> {
        Ok(read_json(&self.rules_path()).await?.unwrap_or_default())
    }

    async fn update_rules(&self, updates: &[RuleWriteBack]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        // Re-read under the lock so edits made since the engine's read survive.
        let mut entries: Vec<HeaderRuleEntry> =
            read_json(&self.rules_path()).await?.unwrap_or_default();

        let written = apply_write_backs(&mut entries, updates);
        if written.is_empty() {
            return Ok(0);
        }

        write_json(&self.rules_path(), &entries).await?;
        let count = written.len();
        debug!(count, "rule entries written back");
        let _ = self.changes.send(StoreChange::synced(written));
        Ok(count)
    }

    async fn load_cached_sources(&self) -> Result<Vec<DynamicSource>, StoreError> {
        Ok(self.read_local().await?.sources)
    }

    async fn save_cached_sources(&self, sources: &[DynamicSource]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_local().await?;
        doc.sources = sources.to_vec();
        write_json(&self.local_path(), &doc).await?;
        let _ = self.changes.send(StoreChange::local("sources"));
        Ok(())
    }

    async fn setup_completed(&self) -> Result<bool, StoreError> {
        Ok(self.read_local().await?.setup_completed)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

// ── File helpers ─────────────────────────────────────────────────────

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await?;
    Ok(())
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
