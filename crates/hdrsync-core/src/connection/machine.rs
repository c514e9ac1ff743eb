// ── Connection state machine ──
//
// Pure transition logic: inputs in, effects out, no I/O. Every attempt
// gets a fresh generation; completions tagged with an older generation
// are ignored, which is how a superseded probe or handshake that finishes
// late is discarded.

use std::time::Duration;

use serde::Serialize;
use strum::Display;

/// Attempt counter. Bumped whenever a new attempt starts or the machine stops.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Probing,
    Connecting,
    Connected,
    ReconnectPending,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// An attempt is in flight.
    pub fn is_attempting(self) -> bool {
        matches!(self, Self::Probing | Self::Connecting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Start,
    ReconnectRequested,
    ProbeFinished { generation: Generation, reachable: bool },
    HandshakeFinished { generation: Generation, ok: bool },
    SocketClosed { generation: Generation },
    RetryElapsed { generation: Generation },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Broadcast(ConnectionState),
    Probe { generation: Generation },
    Handshake { generation: Generation },
    StartReading { generation: Generation },
    CloseSocket,
    ScheduleRetry { generation: Generation, delay: Duration },
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    generation: Generation,
    reconnect_delay: Duration,
}

impl ConnectionMachine {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        use ConnectionState as S;

        match input {
            Input::Start => match self.state {
                S::Disconnected | S::ReconnectPending => self.begin_attempt(),
                S::Probing | S::Connecting | S::Connected => Vec::new(),
            },
            Input::ReconnectRequested => match self.state {
                // Only one attempt may be in flight.
                S::Probing | S::Connecting => Vec::new(),
                S::Disconnected | S::ReconnectPending => self.begin_attempt(),
                S::Connected => {
                    let mut effects = vec![Effect::CloseSocket];
                    effects.extend(self.begin_attempt());
                    effects
                }
            },
            Input::ProbeFinished { generation, reachable } => {
                if !self.is_current(generation, S::Probing) {
                    return Vec::new();
                }
                if reachable {
                    let mut effects = self.transition(S::Connecting);
                    effects.push(Effect::Handshake { generation });
                    effects
                } else {
                    self.enter_pending()
                }
            }
            Input::HandshakeFinished { generation, ok } => {
                if !self.is_current(generation, S::Connecting) {
                    return Vec::new();
                }
                if ok {
                    let mut effects = self.transition(S::Connected);
                    effects.push(Effect::StartReading { generation });
                    effects
                } else {
                    self.enter_pending()
                }
            }
            Input::SocketClosed { generation } => {
                if !self.is_current(generation, S::Connected) {
                    return Vec::new();
                }
                let mut effects = vec![Effect::CloseSocket];
                effects.extend(self.enter_pending());
                effects
            }
            Input::RetryElapsed { generation } => {
                if self.is_current(generation, S::ReconnectPending) {
                    self.begin_attempt()
                } else {
                    Vec::new()
                }
            }
            Input::Stop => {
                let mut effects = Vec::new();
                if self.state == S::Connected {
                    effects.push(Effect::CloseSocket);
                }
                // Invalidate everything still in flight.
                self.generation += 1;
                effects.extend(self.transition(S::Disconnected));
                effects
            }
        }
    }

    fn is_current(&self, generation: Generation, expected: ConnectionState) -> bool {
        generation == self.generation && self.state == expected
    }

    fn begin_attempt(&mut self) -> Vec<Effect> {
        self.generation += 1;
        let mut effects = self.transition(ConnectionState::Probing);
        effects.push(Effect::Probe {
            generation: self.generation,
        });
        effects
    }

    fn enter_pending(&mut self) -> Vec<Effect> {
        let mut effects = self.transition(ConnectionState::ReconnectPending);
        effects.push(Effect::ScheduleRetry {
            generation: self.generation,
            delay: self.reconnect_delay,
        });
        effects
    }

    /// Broadcast only on an actual change.
    fn transition(&mut self, next: ConnectionState) -> Vec<Effect> {
        if self.state == next {
            return Vec::new();
        }
        self.state = next;
        vec![Effect::Broadcast(next)]
    }
}
