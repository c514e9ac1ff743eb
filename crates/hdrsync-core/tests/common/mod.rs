// Shared fakes for engine and connection tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hdrsync_api::{CompanionMessage, ProbeOutcome, WireSource};
use tokio::sync::{broadcast, mpsc, watch};

use hdrsync_core::{
    Companion, CompanionSession, CoreError, DurableStore, DynamicSource, Engine, EngineConfig,
    EngineHandle, HeaderRuleEntry, MemoryNetworkLayer, MemoryStore, NetworkLayer, RuleWriteBack,
    StoreChange, StoreError,
};

// ── Scripted companion ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    Answer(ProbeOutcome),
    /// Never answers; the manager's probe timeout decides.
    Hang,
}

pub enum Frame {
    Message(CompanionMessage),
    Close,
    Fail,
}

/// Test-side end of one fake socket.
#[derive(Clone)]
pub struct Feed(mpsc::UnboundedSender<Frame>);

impl Feed {
    pub fn send(&self, message: CompanionMessage) {
        let _ = self.0.send(Frame::Message(message));
    }

    pub fn close(&self) {
        let _ = self.0.send(Frame::Close);
    }

    pub fn fail(&self) {
        let _ = self.0.send(Frame::Fail);
    }
}

pub struct ScriptedCompanion {
    probe: Mutex<ProbeBehavior>,
    refuse_connect: Mutex<bool>,
    probes: AtomicUsize,
    connects: AtomicUsize,
    feeds: watch::Sender<Vec<Feed>>,
}

impl ScriptedCompanion {
    pub fn new(probe: ProbeBehavior) -> Self {
        let (feeds, _) = watch::channel(Vec::new());
        Self {
            probe: Mutex::new(probe),
            refuse_connect: Mutex::new(false),
            probes: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            feeds,
        }
    }

    pub fn reachable() -> Self {
        Self::new(ProbeBehavior::Answer(ProbeOutcome::Reachable))
    }

    pub fn refusing() -> Self {
        Self::new(ProbeBehavior::Answer(ProbeOutcome::Refused))
    }

    pub fn set_probe(&self, behavior: ProbeBehavior) {
        *self.probe.lock().unwrap() = behavior;
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        *self.refuse_connect.lock().unwrap() = refuse;
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Wait for the `index`-th session (0-based) to open.
    pub async fn feed(&self, index: usize) -> Feed {
        let mut rx = self.feeds.subscribe();
        let feeds = within(rx.wait_for(|f| f.len() > index)).await.unwrap();
        feeds[index].clone()
    }
}

#[async_trait]
impl Companion for ScriptedCompanion {
    async fn probe(&self) -> ProbeOutcome {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let behavior = self.probe.lock().unwrap().clone();
        match behavior {
            ProbeBehavior::Answer(outcome) => outcome,
            ProbeBehavior::Hang => std::future::pending().await,
        }
    }

    async fn connect(&self) -> Result<Box<dyn CompanionSession>, CoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if *self.refuse_connect.lock().unwrap() {
            return Err(CoreError::ConnectionFailed {
                url: "ws://fake/".into(),
                reason: "refused".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.send_modify(|f| f.push(Feed(tx)));
        Ok(Box::new(ChannelSession { rx }))
    }
}

struct ChannelSession {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl CompanionSession for ChannelSession {
    async fn next_message(&mut self) -> Result<Option<CompanionMessage>, CoreError> {
        match self.rx.recv().await {
            Some(Frame::Message(m)) => Ok(Some(m)),
            Some(Frame::Close) | None => Ok(None),
            Some(Frame::Fail) => Err(CoreError::ConnectionFailed {
                url: "ws://fake/".into(),
                reason: "reset".into(),
            }),
        }
    }

    async fn close(self: Box<Self>) {}
}

// ── Store that never notifies ───────────────────────────────────────

/// Wraps a `MemoryStore` but swallows change notifications, as if the
/// host dropped them.
pub struct QuietStore {
    pub inner: MemoryStore,
    silent: broadcast::Sender<StoreChange>,
}

impl QuietStore {
    pub fn new(inner: MemoryStore) -> Self {
        let (silent, _) = broadcast::channel(1);
        Self { inner, silent }
    }
}

#[async_trait]
impl DurableStore for QuietStore {
    async fn load_rules(&self) -> Result<Vec<HeaderRuleEntry>, StoreError> {
        self.inner.load_rules().await
    }

    async fn update_rules(&self, updates: &[RuleWriteBack]) -> Result<usize, StoreError> {
        self.inner.update_rules(updates).await
    }

    async fn load_cached_sources(&self) -> Result<Vec<DynamicSource>, StoreError> {
        self.inner.load_cached_sources().await
    }

    async fn save_cached_sources(&self, sources: &[DynamicSource]) -> Result<(), StoreError> {
        self.inner.save_cached_sources(sources).await
    }

    async fn setup_completed(&self) -> Result<bool, StoreError> {
        self.inner.setup_completed().await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.silent.subscribe()
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: Engine,
    pub handle: EngineHandle,
    pub network: Arc<MemoryNetworkLayer>,
    pub companion: Arc<ScriptedCompanion>,
}

pub fn start(
    store: Arc<dyn DurableStore>,
    network: Arc<MemoryNetworkLayer>,
    companion: ScriptedCompanion,
) -> Harness {
    let companion = Arc::new(companion);
    let engine = Engine::start(
        EngineConfig::default(),
        store,
        Arc::clone(&network) as Arc<dyn NetworkLayer>,
        Arc::clone(&companion) as Arc<dyn Companion>,
    );
    let handle = engine.handle();
    Harness {
        engine,
        handle,
        network,
        companion,
    }
}

/// Fail the test instead of hanging forever.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(120), fut)
        .await
        .expect("timed out waiting for condition")
}

// ── Builders ────────────────────────────────────────────────────────

pub fn wire(id: &str, content: &str) -> WireSource {
    WireSource {
        source_id: id.into(),
        source_type: Some("http".into()),
        source_tag: None,
        source_path: None,
        source_content: content.into(),
    }
}

pub fn initial(pairs: &[(&str, &str)]) -> CompanionMessage {
    CompanionMessage::Snapshot {
        sources: pairs.iter().map(|(id, c)| wire(id, c)).collect(),
    }
}

pub fn update(pairs: &[(&str, &str)]) -> CompanionMessage {
    CompanionMessage::Update {
        sources: pairs.iter().map(|(id, c)| wire(id, c)).collect(),
    }
}

pub fn dynamic_rule(id: &str, header: &str, source_id: &str, domain: &str) -> HeaderRuleEntry {
    HeaderRuleEntry::new_dynamic(id, header, source_id).with_domains([domain])
}

pub fn static_rule(id: &str, header: &str, value: &str, domain: &str) -> HeaderRuleEntry {
    HeaderRuleEntry::new_static(id, header, value).with_domains([domain])
}
