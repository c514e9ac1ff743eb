// ── Engine ──
//
// One actor task owns every piece of mutable engine state (source store,
// digests, debounce deadline, generation counter). Connection events,
// store notifications, liveness ticks and handle requests all arrive as
// messages, so nothing here needs a lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{BusMessage, MessageBus};
use crate::compiler::compile;
use crate::config::EngineConfig;
use crate::connection::{Companion, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, Generation};
use crate::digest::{ChangeDigest, digest_rules, should_recompute};
use crate::error::CoreError;
use crate::model::{DynamicSource, HeaderRuleEntry, apply_write_backs};
use crate::network::NetworkLayer;
use crate::publisher::RulePublisher;
use crate::scheduler::liveness_task;
use crate::store::{DurableStore, SourceStore, StoreChange, StoreScope};

const COMMAND_CHANNEL_SIZE: usize = 64;
const CONNECTION_CHANNEL_SIZE: usize = 64;

// ── Public types ─────────────────────────────────────────────────────

/// Observable engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub connection: ConnectionState,
    pub source_count: usize,
    /// Number of rule sets published since start.
    pub generation: u64,
    pub rule_count: usize,
    pub invalid_entry_ids: Vec<String>,
    pub last_applied_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub setup_completed: bool,
}

/// A rule set that made it into the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedGeneration {
    pub generation: u64,
    pub rule_count: usize,
    pub invalid_entry_ids: Vec<String>,
}

pub(crate) enum EngineCommand {
    RulesChanged,
    LivenessTick,
    ReconcileNow(oneshot::Sender<Result<AppliedGeneration, CoreError>>),
}

/// Running engine. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the tasks running until the runtime stops.
pub struct Engine {
    handle: EngineHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the actor, connection manager, store forwarder and liveness
    /// scheduler. Must be called from within a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn DurableStore>,
        network: Arc<dyn NetworkLayer>,
        companion: Arc<dyn Companion>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let bus = MessageBus::new();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (conn_tx, conn_rx) = mpsc::channel(CONNECTION_CHANNEL_SIZE);
        let (status_tx, status_rx) = watch::channel(EngineStatus::default());

        let (connection, conn_task) =
            ConnectionManager::spawn(companion, &config.timings, conn_tx, cancel.child_token());

        let store_changes = store.subscribe();
        let liveness_interval = config.timings.liveness_interval;

        let actor = EngineActor {
            publisher: RulePublisher::new(network, config.compiler.reserved_rule_ids),
            config,
            store,
            bus: bus.clone(),
            sources: SourceStore::new(),
            observed_rules: None,
            last_applied: None,
            live_generation: None,
            connected: false,
            rule_generation: 0,
            status: status_tx,
            debounce: None,
        };
        let sources_rx = actor.sources.subscribe();

        let tasks = vec![
            conn_task,
            tokio::spawn(actor.run(command_rx, conn_rx, cancel.clone())),
            tokio::spawn(store_forwarder(
                store_changes,
                command_tx.clone(),
                cancel.clone(),
            )),
            tokio::spawn(liveness_task(
                command_tx.clone(),
                liveness_interval,
                cancel.clone(),
            )),
        ];

        Self {
            handle: EngineHandle {
                commands: command_tx,
                status: status_rx,
                sources: sources_rx,
                bus,
                connection,
                cancel: cancel.clone(),
            },
            cancel,
            tasks,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop all tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("engine stopped");
    }
}

/// Cloneable control surface for a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    status: watch::Receiver<EngineStatus>,
    sources: watch::Receiver<Arc<Vec<DynamicSource>>>,
    bus: MessageBus,
    connection: ConnectionHandle,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Drop the current socket (if any) and reconnect now.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Tell the engine rule entries changed, for stores that cannot
    /// notify on their own. Goes through the debouncer.
    pub async fn rules_changed(&self) -> Result<(), CoreError> {
        self.commands
            .send(EngineCommand::RulesChanged)
            .await
            .map_err(|_| CoreError::EngineStopped)
    }

    /// Compile and publish immediately, bypassing the debouncer and the
    /// unchanged-input check.
    pub async fn reconcile_now(&self) -> Result<AppliedGeneration, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::ReconcileNow(tx))
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        rx.await.map_err(|_| CoreError::EngineStopped)?
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn status_stream(&self) -> WatchStream<EngineStatus> {
        WatchStream::new(self.status.clone())
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// The live source list.
    pub fn sources(&self) -> Arc<Vec<DynamicSource>> {
        self.sources.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        self.bus.subscribe()
    }

    /// Signal every engine task to stop. Use [`Engine::shutdown`] to also
    /// wait for them.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Actor ────────────────────────────────────────────────────────────

/// Digests of the inputs behind the last publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedKey {
    sources: ChangeDigest,
    rules: ChangeDigest,
}

struct EngineActor {
    config: EngineConfig,
    store: Arc<dyn DurableStore>,
    publisher: RulePublisher,
    bus: MessageBus,
    sources: SourceStore,
    /// Rule digest as of the last store read.
    observed_rules: Option<ChangeDigest>,
    last_applied: Option<AppliedKey>,
    /// Attempt generation whose socket is currently open.
    live_generation: Option<Generation>,
    connected: bool,
    rule_generation: u64,
    status: watch::Sender<EngineStatus>,
    debounce: Option<Instant>,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut connection: mpsc::Receiver<ConnectionEvent>,
        cancel: CancellationToken,
    ) {
        self.cold_start().await;

        loop {
            let deadline = self.debounce;
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(event) = connection.recv() => self.on_connection_event(event).await,
                Some(command) = commands.recv() => self.on_command(command).await,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.debounce = None;
                    self.reconcile_if_changed().await;
                }
                else => break,
            }
        }
        debug!("engine actor stopped");
    }

    /// Seed sources from the local cache so rules apply before the
    /// companion answers, then schedule the first pass.
    async fn cold_start(&mut self) {
        match self.store.setup_completed().await {
            Ok(done) => self.status.send_modify(|s| s.setup_completed = done),
            Err(e) => warn!(error = %e, "could not read setup flag"),
        }

        match self.store.load_cached_sources().await {
            Ok(cached) if !cached.is_empty() => {
                info!(count = cached.len(), "seeded sources from local cache");
                self.sources.replace(cached);
                let count = self.sources.len();
                self.status.send_modify(|s| s.source_count = count);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not read cached sources"),
        }

        self.schedule();
    }

    /// (Re)start the debounce window.
    fn schedule(&mut self) {
        self.debounce = Some(Instant::now() + self.config.timings.debounce);
    }

    // ── Triggers ─────────────────────────────────────────────────────

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { state, generation } => {
                self.live_generation = state.is_connected().then_some(generation);
                self.status.send_modify(|s| s.connection = state);
                if state.is_connected() != self.connected {
                    self.connected = state.is_connected();
                    self.bus.publish(BusMessage::ConnectionStatus {
                        connected: self.connected,
                    });
                }
            }
            ConnectionEvent::Sources {
                generation,
                kind,
                sources,
            } => {
                if self.live_generation != Some(generation) {
                    debug!(generation, "dropping snapshot from superseded connection");
                    return;
                }
                if !self.sources.replace(sources) {
                    debug!(?kind, "source snapshot unchanged, skipping");
                    return;
                }

                let snapshot = self.sources.snapshot();
                info!(
                    ?kind,
                    count = snapshot.len(),
                    digest = %self.sources.digest().short(),
                    "sources updated"
                );
                if let Err(e) = self.store.save_cached_sources(&snapshot).await {
                    warn!(error = %e, "could not cache sources");
                }
                let count = snapshot.len();
                self.status.send_modify(|s| s.source_count = count);
                self.bus.publish(BusMessage::SourcesUpdated {
                    sources: snapshot.to_vec(),
                });
                self.schedule();
            }
        }
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::RulesChanged => self.on_rules_changed().await,
            EngineCommand::LivenessTick => self.on_liveness_tick().await,
            EngineCommand::ReconcileNow(reply) => {
                self.debounce = None;
                let result = match self.load_inputs().await {
                    Ok((rules, key)) => self.apply(&rules, key).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn on_rules_changed(&mut self) {
        match self.store.load_rules().await {
            Ok(rules) => {
                let digest = digest_rules(&rules);
                if should_recompute(&digest, self.observed_rules.as_ref()) {
                    debug!(digest = %digest.short(), "rule entries changed");
                    self.observed_rules = Some(digest);
                    self.schedule();
                } else {
                    trace!("rule notification without semantic change");
                }
            }
            Err(e) => {
                warn!(error = %e, "could not read rule entries after change");
                self.schedule();
            }
        }
    }

    async fn on_liveness_tick(&mut self) {
        let rules = match self.store.load_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "liveness check could not read rule entries");
                return;
            }
        };
        let key = AppliedKey {
            sources: self.sources.digest(),
            rules: digest_rules(&rules),
        };
        self.observed_rules = Some(key.rules);
        if self.last_applied != Some(key) {
            info!("drift detected on liveness tick, reconciling");
            self.schedule();
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    async fn load_inputs(&mut self) -> Result<(Vec<HeaderRuleEntry>, AppliedKey), CoreError> {
        let rules = self.store.load_rules().await.inspect_err(|e| {
            warn!(error = %e, "could not read rule entries");
        })?;
        let key = AppliedKey {
            sources: self.sources.digest(),
            rules: digest_rules(&rules),
        };
        Ok((rules, key))
    }

    async fn reconcile_if_changed(&mut self) {
        let Ok((rules, key)) = self.load_inputs().await else {
            return;
        };
        if self.last_applied == Some(key) {
            debug!("inputs unchanged since last publish, skipping");
            return;
        }
        let _ = self.apply(&rules, key).await;
    }

    /// Compile, write back flags, publish, then report.
    async fn apply(
        &mut self,
        rules: &[HeaderRuleEntry],
        mut key: AppliedKey,
    ) -> Result<AppliedGeneration, CoreError> {
        let sources = self.sources.snapshot();
        let compiled = compile(rules, &sources, &self.config.compiler);

        for entry in &compiled.invalid {
            if entry.reason.is_emitted() {
                debug!(id = %entry.id, reason = %entry.reason, "rule entry repaired");
            } else {
                warn!(id = %entry.id, reason = %entry.reason, "rule entry skipped");
            }
        }

        if !compiled.updates.is_empty() {
            match self.store.update_rules(&compiled.updates).await {
                Ok(written) => {
                    debug!(written, "rule entry flags written back");
                    // Key on the entries as written, so the store's own
                    // notification for a sanitized value is not a change.
                    let mut written_back = rules.to_vec();
                    apply_write_backs(&mut written_back, &compiled.updates);
                    key.rules = digest_rules(&written_back);
                }
                Err(e) => warn!(error = %e, "rule entry write-back failed"),
            }
        }

        // Recorded before publishing: a failed publish is retried by the
        // next change, not by every tick.
        self.last_applied = Some(key);
        self.observed_rules = Some(key.rules);

        let invalid_entry_ids = compiled.invalid_entry_ids();
        match self.publisher.publish(&compiled.rules).await {
            Ok(report) => {
                self.rule_generation += 1;
                let applied = AppliedGeneration {
                    generation: self.rule_generation,
                    rule_count: report.rule_count,
                    invalid_entry_ids,
                };
                info!(
                    generation = applied.generation,
                    rule_count = applied.rule_count,
                    invalid = applied.invalid_entry_ids.len(),
                    retried = report.retried,
                    "rule set applied"
                );

                let now = Utc::now();
                self.status.send_modify(|s| {
                    s.generation = applied.generation;
                    s.rule_count = applied.rule_count;
                    s.invalid_entry_ids.clone_from(&applied.invalid_entry_ids);
                    s.last_applied_at = Some(now);
                    s.last_error = None;
                });
                self.bus.publish(BusMessage::RulesApplied {
                    generation: applied.generation,
                    rule_count: applied.rule_count,
                    invalid_entry_ids: applied.invalid_entry_ids.clone(),
                });
                Ok(applied)
            }
            Err(e) => {
                error!(error = %e, "rule set publish failed");
                let message = e.to_string();
                self.status.send_modify(|s| s.last_error = Some(message.clone()));
                self.bus.publish(BusMessage::RuleUpdateError { error: message });
                Err(e.into())
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Turn synced-scope store notifications into engine commands.
async fn store_forwarder(
    mut changes: broadcast::Receiver<StoreChange>,
    commands: mpsc::Sender<EngineCommand>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            change = changes.recv() => change,
        };

        let notify = match change {
            Ok(change) => {
                trace!(scope = %change.scope, keys = ?change.keys, "store change");
                change.scope == StoreScope::Synced
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "store notifications lagged");
                true
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if notify && commands.send(EngineCommand::RulesChanged).await.is_err() {
            break;
        }
    }
}
