// ── Connection driver ──
//
// Owns the state machine and turns its effects into spawned work: the
// probe, the handshake, a socket reader and retry timers. Each of those
// reports back over one completion channel tagged with its generation,
// so the machine alone decides whether a late result still matters.

use std::sync::Arc;
use std::time::Duration;

use hdrsync_api::{ProbeOutcome, SnapshotKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::{ConnectionMachine, ConnectionState, Effect, Generation, Input};
use super::{Companion, CompanionSession};
use crate::config::Timings;
use crate::convert::sources_from_wire;
use crate::error::CoreError;
use crate::model::DynamicSource;

const CONTROL_CHANNEL_SIZE: usize = 8;

/// What the manager reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        state: ConnectionState,
        generation: Generation,
    },
    /// A full source snapshot read on the socket of attempt `generation`.
    Sources {
        generation: Generation,
        kind: SnapshotKind,
        sources: Vec<DynamicSource>,
    },
}

enum Control {
    Reconnect,
}

enum Completion {
    Probe {
        generation: Generation,
        outcome: ProbeOutcome,
    },
    Handshake {
        generation: Generation,
        result: Result<Box<dyn CompanionSession>, CoreError>,
    },
    Closed {
        generation: Generation,
        error: Option<CoreError>,
    },
    Retry {
        generation: Generation,
    },
}

/// Cheap handle for requesting reconnects and observing state.
#[derive(Clone)]
pub struct ConnectionHandle {
    control: mpsc::Sender<Control>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Ask for a reconnect. Ignored while an attempt is already in flight.
    pub fn reconnect(&self) {
        if self.control.try_send(Control::Reconnect).is_err() {
            debug!("reconnect request dropped, manager busy or stopped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

pub struct ConnectionManager {
    companion: Arc<dyn Companion>,
    probe_timeout: Duration,
    handshake_timeout: Duration,
    machine: ConnectionMachine,
    events: mpsc::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    done_tx: mpsc::UnboundedSender<Completion>,
    reader: Option<CancellationToken>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Start connecting immediately; runs until `cancel` fires.
    pub fn spawn(
        companion: Arc<dyn Companion>,
        timings: &Timings,
        events: mpsc::Sender<ConnectionEvent>,
        cancel: CancellationToken,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let manager = Self {
            companion,
            probe_timeout: timings.probe_timeout,
            handshake_timeout: timings.handshake_timeout,
            machine: ConnectionMachine::new(timings.reconnect_delay),
            events,
            state: state_tx,
            done_tx,
            reader: None,
            cancel,
        };
        let task = tokio::spawn(manager.run(control_rx, done_rx));

        (
            ConnectionHandle {
                control: control_tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut control: mpsc::Receiver<Control>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        self.dispatch(Input::Start, None).await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(Control::Reconnect) = control.recv() => {
                    info!("reconnect requested");
                    self.dispatch(Input::ReconnectRequested, None).await;
                }
                Some(completion) = done.recv() => self.on_completion(completion).await,
            }
        }

        // Shutdown: nobody is listening for events any more.
        let _ = self.machine.handle(Input::Stop);
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
        self.state.send_replace(ConnectionState::Disconnected);
        debug!("connection manager stopped");
    }

    async fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Probe {
                generation,
                outcome,
            } => {
                debug!(generation, %outcome, "probe finished");
                let reachable = outcome.permits_connect();
                self.dispatch(Input::ProbeFinished { generation, reachable }, None)
                    .await;
            }
            Completion::Handshake { generation, result } => match result {
                Ok(session) => {
                    self.dispatch(Input::HandshakeFinished { generation, ok: true }, Some(session))
                        .await;
                }
                Err(e) => {
                    warn!(generation, error = %e, "companion handshake failed");
                    self.dispatch(Input::HandshakeFinished { generation, ok: false }, None)
                        .await;
                }
            },
            Completion::Closed { generation, error } => {
                match error {
                    Some(e) => warn!(generation, error = %e, "companion socket failed"),
                    None => info!(generation, "companion closed the connection"),
                }
                self.dispatch(Input::SocketClosed { generation }, None).await;
            }
            Completion::Retry { generation } => {
                self.dispatch(Input::RetryElapsed { generation }, None).await;
            }
        }
    }

    /// Feed one input to the machine and carry out its effects. `session`
    /// is the freshly opened socket for a handshake completion, if any.
    async fn dispatch(&mut self, input: Input, mut session: Option<Box<dyn CompanionSession>>) {
        for effect in self.machine.handle(input) {
            match effect {
                Effect::Broadcast(state) => {
                    let generation = self.machine.generation();
                    info!(%state, generation, "connection state changed");
                    self.state.send_replace(state);
                    let _ = self
                        .events
                        .send(ConnectionEvent::StateChanged { state, generation })
                        .await;
                }
                Effect::Probe { generation } => self.spawn_probe(generation),
                Effect::Handshake { generation } => self.spawn_handshake(generation),
                Effect::StartReading { generation } => {
                    if let Some(session) = session.take() {
                        self.spawn_reader(generation, session);
                    }
                }
                Effect::CloseSocket => {
                    if let Some(reader) = self.reader.take() {
                        reader.cancel();
                    }
                }
                Effect::ScheduleRetry { generation, delay } => {
                    info!(generation, ?delay, "companion unavailable, retrying after delay");
                    self.spawn_retry(generation, delay);
                }
            }
        }

        if let Some(stale) = session {
            debug!("discarding superseded companion session");
            tokio::spawn(stale.close());
        }
    }

    // ── Spawned work ─────────────────────────────────────────────────

    fn spawn_probe(&self, generation: Generation) {
        let companion = Arc::clone(&self.companion);
        let done = self.done_tx.clone();
        let cancel = self.cancel.clone();
        let timeout = self.probe_timeout;

        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => return,
                r = tokio::time::timeout(timeout, companion.probe()) => {
                    r.unwrap_or(ProbeOutcome::TimedOut)
                }
            };
            let _ = done.send(Completion::Probe { generation, outcome });
        });
    }

    fn spawn_handshake(&self, generation: Generation) {
        let companion = Arc::clone(&self.companion);
        let done = self.done_tx.clone();
        let cancel = self.cancel.clone();
        let timeout = self.handshake_timeout;

        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                r = tokio::time::timeout(timeout, companion.connect()) => {
                    r.unwrap_or_else(|_| {
                        Err(CoreError::Timeout {
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        })
                    })
                }
            };
            let _ = done.send(Completion::Handshake { generation, result });
        });
    }

    fn spawn_reader(&mut self, generation: Generation, mut session: Box<dyn CompanionSession>) {
        let token = self.cancel.child_token();
        self.reader = Some(token.clone());
        let events = self.events.clone();
        let done = self.done_tx.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    msg = session.next_message() => Some(msg),
                };
                let Some(next) = next else {
                    session.close().await;
                    return;
                };

                match next {
                    Ok(Some(message)) => {
                        let kind = message.kind();
                        let sources = sources_from_wire(message.into_sources());
                        debug!(generation, ?kind, count = sources.len(), "source snapshot received");
                        let event = ConnectionEvent::Sources {
                            generation,
                            kind,
                            sources,
                        };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = done.send(Completion::Closed {
                            generation,
                            error: None,
                        });
                        return;
                    }
                    Err(e) => {
                        let _ = done.send(Completion::Closed {
                            generation,
                            error: Some(e),
                        });
                        return;
                    }
                }
            }
        });
    }

    fn spawn_retry(&self, generation: Generation, delay: Duration) {
        let done = self.done_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = done.send(Completion::Retry { generation });
                }
            }
        });
    }
}
