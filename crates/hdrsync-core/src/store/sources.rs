// ── Source store ──
//
// The engine's copy of the live source list. Only the engine actor
// writes it; observers read point-in-time snapshots or watch for
// replacement.

use std::sync::Arc;

use tokio::sync::watch;

use crate::digest::{ChangeDigest, digest_sources, should_recompute};
use crate::model::DynamicSource;

pub struct SourceStore {
    snapshot: watch::Sender<Arc<Vec<DynamicSource>>>,
    digest: ChangeDigest,
}

impl SourceStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            snapshot,
            digest: digest_sources(&[]),
        }
    }

    /// Replace the whole list. Returns `false` (and changes nothing) when
    /// the content digest is unchanged.
    pub fn replace(&mut self, sources: Vec<DynamicSource>) -> bool {
        let digest = digest_sources(&sources);
        if !should_recompute(&digest, Some(&self.digest)) {
            return false;
        }
        self.digest = digest;
        self.snapshot.send_replace(Arc::new(sources));
        true
    }

    pub fn snapshot(&self) -> Arc<Vec<DynamicSource>> {
        self.snapshot.borrow().clone()
    }

    pub fn digest(&self) -> ChangeDigest {
        self.digest
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DynamicSource>>> {
        self.snapshot.subscribe()
    }
}

impl Default for SourceStore {
    fn default() -> Self {
        Self::new()
    }
}
