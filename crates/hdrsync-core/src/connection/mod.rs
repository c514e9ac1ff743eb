// ── Connection manager ──
//
// `ConnectionMachine` decides, `ConnectionManager` does the I/O. The
// companion itself sits behind the `Companion` / `CompanionSession`
// traits so the engine can be driven by a scripted peer in tests.

mod machine;
mod manager;

use std::time::Duration;

use async_trait::async_trait;
use hdrsync_api::{
    ClientPlatform, CompanionClient, CompanionEndpoint, CompanionMessage, CompanionSocket,
    ProbeOutcome, Prober, TransportConfig,
};

use crate::config::EngineConfig;
use crate::error::CoreError;

pub use machine::{ConnectionMachine, ConnectionState, Effect, Generation, Input};
pub use manager::{ConnectionEvent, ConnectionHandle, ConnectionManager};

/// A peer that can be probed and connected to.
#[async_trait]
pub trait Companion: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;

    async fn connect(&self) -> Result<Box<dyn CompanionSession>, CoreError>;
}

/// One open socket to the companion.
#[async_trait]
pub trait CompanionSession: Send {
    /// Next decoded message; `Ok(None)` once the peer closed cleanly.
    async fn next_message(&mut self) -> Result<Option<CompanionMessage>, CoreError>;

    async fn close(self: Box<Self>);
}

// ── Real companion over HTTP + WebSocket ─────────────────────────────

/// The companion process reached through `hdrsync-api`.
pub struct RemoteCompanion {
    prober: Prober,
    client: CompanionClient,
}

impl RemoteCompanion {
    pub fn new(config: &EngineConfig) -> Result<Self, CoreError> {
        Self::with_timeouts(
            &config.endpoint,
            config.platform,
            config.timings.probe_timeout,
            config.timings.handshake_timeout,
        )
    }

    pub fn with_timeouts(
        endpoint: &CompanionEndpoint,
        platform: ClientPlatform,
        probe_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let transport = TransportConfig::default().with_timeout(probe_timeout);
        let prober = Prober::new(endpoint, platform, &transport)?;
        let client = CompanionClient::new(endpoint, platform)?.with_handshake_timeout(handshake_timeout);
        Ok(Self { prober, client })
    }

    pub fn probe_url(&self) -> &url::Url {
        self.prober.url()
    }

    pub fn socket_url(&self) -> &url::Url {
        self.client.socket_url()
    }
}

#[async_trait]
impl Companion for RemoteCompanion {
    async fn probe(&self) -> ProbeOutcome {
        self.prober.probe().await
    }

    async fn connect(&self) -> Result<Box<dyn CompanionSession>, CoreError> {
        let socket = self.client.connect().await?;
        Ok(Box::new(socket))
    }
}

#[async_trait]
impl CompanionSession for CompanionSocket {
    async fn next_message(&mut self) -> Result<Option<CompanionMessage>, CoreError> {
        Ok(CompanionSocket::next_message(self).await?)
    }

    async fn close(self: Box<Self>) {
        CompanionSocket::close(*self).await;
    }
}
