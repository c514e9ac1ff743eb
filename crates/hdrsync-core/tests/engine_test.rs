// Engine behavior against a scripted companion, on a paused clock.
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio::time::sleep;

use hdrsync_core::{
    BusMessage, ConnectionState, DurableStore, DynamicSource, HeaderRuleEntry, MemoryNetworkLayer,
    MemoryStore, RuleWriteBack, StoreChange, StoreError, ValueSource,
};

use common::{
    QuietStore, ScriptedCompanion, dynamic_rule, initial, start, static_rule, update, within,
};

async fn wait_connected(handle: &hdrsync_core::EngineHandle) {
    let mut rx = handle.connection_state();
    within(rx.wait_for(|s| *s == ConnectionState::Connected)).await.unwrap();
}

async fn wait_rule_count(network: &MemoryNetworkLayer, count: usize) {
    let mut rx = network.subscribe();
    within(rx.wait_for(|rules| rules.len() == count)).await.unwrap();
}

fn header_value(network: &MemoryNetworkLayer, header: &str) -> Option<String> {
    network
        .active_rules()
        .first()
        .and_then(|r| r.value_for(header).map(str::to_owned))
}

/// Applies one user edit right before the engine's first write-back lands.
struct EditingStore {
    inner: MemoryStore,
    edit: Mutex<Option<HeaderRuleEntry>>,
}

#[async_trait]
impl DurableStore for EditingStore {
    async fn load_rules(&self) -> Result<Vec<HeaderRuleEntry>, StoreError> {
        self.inner.load_rules().await
    }

    async fn update_rules(&self, updates: &[RuleWriteBack]) -> Result<usize, StoreError> {
        let edit = self.edit.lock().unwrap().take();
        if let Some(entry) = edit {
            self.inner.put_rule(entry).await;
        }
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
        self.inner.subscribe()
    }
}

// ── Source pushes ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_initial_snapshot_compiles_dynamic_rule() {
    let store = Arc::new(MemoryStore::with_rules([dynamic_rule(
        "r1",
        "X-Token",
        "1",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store.clone(), network.clone(), ScriptedCompanion::reachable());

    wait_connected(&h.handle).await;
    let feed = h.companion.feed(0).await;
    feed.send(initial(&[("1", "abc")]));

    wait_rule_count(&network, 1).await;
    let rule = network.active_rules()[0].clone();
    assert_eq!(rule.domain_filter, "example.com");
    assert_eq!(rule.value_for("x-token"), Some("abc"));

    assert_eq!(h.handle.sources().as_slice(), &[DynamicSource {
        source_type: hdrsync_core::SourceType::Http,
        ..DynamicSource::new("1", "abc")
    }]);
    assert_eq!(store.load_cached_sources().await.unwrap().len(), 1);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pushes_within_debounce_window_publish_once_with_latest_content() {
    let store = Arc::new(MemoryStore::with_rules([dynamic_rule(
        "r1",
        "X-Token",
        "1",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network.clone(), ScriptedCompanion::reachable());

    wait_connected(&h.handle).await;
    let feed = h.companion.feed(0).await;
    // Let the cold-start pass settle.
    sleep(Duration::from_secs(1)).await;
    let before = network.replace_calls();

    feed.send(initial(&[("1", "first")]));
    sleep(Duration::from_millis(50)).await;
    feed.send(update(&[("1", "second")]));
    sleep(Duration::from_secs(1)).await;

    assert_eq!(network.replace_calls(), before + 1);
    assert_eq!(header_value(&network, "x-token").as_deref(), Some("second"));

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_identical_snapshot_is_not_republished() {
    let store = Arc::new(MemoryStore::with_rules([dynamic_rule(
        "r1",
        "X-Token",
        "1",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network.clone(), ScriptedCompanion::reachable());
    let mut bus = h.handle.subscribe();

    wait_connected(&h.handle).await;
    let feed = h.companion.feed(0).await;
    feed.send(initial(&[("1", "abc")]));
    wait_rule_count(&network, 1).await;
    sleep(Duration::from_secs(1)).await;
    let before = network.replace_calls();

    feed.send(update(&[("1", "abc")]));
    sleep(Duration::from_secs(1)).await;

    assert_eq!(network.replace_calls(), before);

    let mut source_updates = 0;
    while let Ok(msg) = bus.try_recv() {
        if matches!(*msg, BusMessage::SourcesUpdated { .. }) {
            source_updates += 1;
        }
    }
    assert_eq!(source_updates, 1);

    h.engine.shutdown().await;
}

// ── Compiler bookkeeping ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_missing_source_is_flagged_then_cleared() {
    let store = Arc::new(MemoryStore::with_rules([dynamic_rule(
        "r1",
        "X-Token",
        "9",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store.clone(), network.clone(), ScriptedCompanion::reachable());

    wait_connected(&h.handle).await;
    let feed = h.companion.feed(0).await;
    feed.send(initial(&[("1", "abc")]));
    sleep(Duration::from_secs(1)).await;

    assert!(network.active_rules().is_empty());
    assert!(store.rule("r1").await.unwrap().source_missing);
    assert_eq!(h.handle.status().borrow().invalid_entry_ids, vec!["r1".to_owned()]);

    feed.send(update(&[("1", "abc"), ("9", "found")]));
    wait_rule_count(&network, 1).await;
    sleep(Duration::from_secs(1)).await;

    assert!(!store.rule("r1").await.unwrap().source_missing);
    assert_eq!(header_value(&network, "x-token").as_deref(), Some("found"));
    assert!(h.handle.status().borrow().invalid_entry_ids.is_empty());

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sanitized_static_value_is_published_once() {
    let store = Arc::new(MemoryStore::with_rules([static_rule(
        "r1",
        "X-Note",
        "a\r\nb",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store.clone(), network.clone(), ScriptedCompanion::refusing());

    wait_rule_count(&network, 1).await;
    // Past the write-back notification and one liveness tick.
    sleep(Duration::from_secs(40)).await;

    assert_eq!(network.replace_calls(), 1);
    assert_eq!(h.handle.status().borrow().generation, 1);
    assert_eq!(header_value(&network, "x-note").as_deref(), Some("ab"));
    assert_eq!(
        store.rule("r1").await.unwrap().value,
        ValueSource::Static { header_value: "ab".into() }
    );

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_write_back_keeps_edit_made_during_compile() {
    let edited = HeaderRuleEntry::new_dynamic("r1", "X-Edited", "9").with_domains(["edited.com"]);
    let store = Arc::new(EditingStore {
        inner: MemoryStore::with_rules([dynamic_rule("r1", "X-Token", "9", "a.com")]),
        edit: Mutex::new(Some(edited)),
    });
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store.clone(), network.clone(), ScriptedCompanion::refusing());

    within(async {
        while store.edit.lock().unwrap().is_some() {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    sleep(Duration::from_secs(1)).await;

    let stored = store.inner.rule("r1").await.unwrap();
    assert_eq!(stored.header_name, "X-Edited");
    assert_eq!(stored.domains.iter().collect::<Vec<_>>(), vec!["edited.com"]);
    assert!(stored.source_missing);
    assert!(network.active_rules().is_empty());

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_reaches_bus_and_status() {
    let store = Arc::new(MemoryStore::with_rules([static_rule(
        "r1",
        "X-Env",
        "staging",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new().with_quota(0));
    let h = start(store, network.clone(), ScriptedCompanion::refusing());
    let mut bus = h.handle.subscribe();

    let error = within(async {
        loop {
            if let BusMessage::RuleUpdateError { error } = &*bus.recv().await.unwrap() {
                break error.clone();
            }
        }
    })
    .await;

    assert!(error.contains("quota"), "unexpected error: {error}");
    let status = h.handle.status().borrow().clone();
    assert_eq!(status.generation, 0);
    assert!(status.last_error.is_some());
    // One attempt plus the single retry.
    assert_eq!(network.replace_calls(), 2);

    h.engine.shutdown().await;
}

// ── Liveness and cold start ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_liveness_tick_repairs_missed_rule_edit() {
    let quiet = Arc::new(QuietStore::new(MemoryStore::with_rules([static_rule(
        "r1",
        "X-Env",
        "one",
        "example.com",
    )])));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(quiet.clone(), network.clone(), ScriptedCompanion::refusing());

    wait_rule_count(&network, 1).await;
    assert_eq!(header_value(&network, "x-env").as_deref(), Some("one"));

    quiet
        .inner
        .put_rule(static_rule("r1", "X-Env", "two", "example.com"))
        .await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(header_value(&network, "x-env").as_deref(), Some("one"));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(header_value(&network, "x-env").as_deref(), Some("two"));

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_quiet_ticks_do_not_republish() {
    let store = Arc::new(MemoryStore::with_rules([static_rule(
        "r1",
        "X-Env",
        "one",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network.clone(), ScriptedCompanion::refusing());

    wait_rule_count(&network, 1).await;
    let before = network.replace_calls();
    sleep(Duration::from_secs(95)).await;

    assert_eq!(network.replace_calls(), before);
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_applies_cached_sources_while_offline() {
    let store = Arc::new(MemoryStore::with_rules([dynamic_rule(
        "r1",
        "X-Token",
        "1",
        "example.com",
    )]));
    store
        .save_cached_sources(&[DynamicSource::new("1", "cached")])
        .await
        .unwrap();
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network.clone(), ScriptedCompanion::refusing());

    wait_rule_count(&network, 1).await;
    assert_eq!(header_value(&network, "x-token").as_deref(), Some("cached"));
    assert_eq!(h.handle.status().borrow().source_count, 1);
    assert_ne!(*h.handle.connection_state().borrow(), ConnectionState::Connected);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_now_publishes_immediately() {
    let store = Arc::new(MemoryStore::with_rules([static_rule(
        "r1",
        "X-Env",
        "one",
        "example.com",
    )]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network.clone(), ScriptedCompanion::refusing());

    let applied = h.handle.reconcile_now().await.unwrap();
    assert_eq!(applied.generation, 1);
    assert_eq!(applied.rule_count, 1);
    assert_eq!(network.active_rules().len(), 1);

    h.engine.shutdown().await;
}

// ── Connection lifecycle as seen by the engine ──────────────────────

#[tokio::test(start_paused = true)]
async fn test_connection_status_follows_socket() {
    let store = Arc::new(MemoryStore::new());
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network, ScriptedCompanion::reachable());
    let mut bus = h.handle.subscribe();

    wait_connected(&h.handle).await;
    h.companion.feed(0).await.close();

    let mut state = h.handle.connection_state();
    within(state.wait_for(|s| *s == ConnectionState::ReconnectPending)).await.unwrap();

    let mut statuses = Vec::new();
    while let Ok(msg) = bus.try_recv() {
        if let BusMessage::ConnectionStatus { connected } = *msg {
            statuses.push(connected);
        }
    }
    assert_eq!(statuses, vec![true, false]);

    // Fixed delay, then a fresh session.
    h.companion.feed(1).await;
    assert_eq!(h.companion.connects(), 2);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_supersedes_previous_session() {
    let store = Arc::new(MemoryStore::new());
    let network = Arc::new(MemoryNetworkLayer::new());
    let h = start(store, network, ScriptedCompanion::reachable());

    wait_connected(&h.handle).await;
    let old = h.companion.feed(0).await;

    h.handle.reconnect();
    let new = h.companion.feed(1).await;
    wait_connected(&h.handle).await;

    old.send(initial(&[("1", "stale")]));
    new.send(initial(&[("1", "fresh")]));
    sleep(Duration::from_secs(1)).await;

    let sources = h.handle.sources();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source_content, "fresh");

    h.engine.shutdown().await;
}
