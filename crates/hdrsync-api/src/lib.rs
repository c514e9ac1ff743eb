// hdrsync-api: Async client for the companion process (probe + source stream)

pub mod endpoint;
pub mod error;
pub mod probe;
pub mod transport;
pub mod websocket;
pub mod wire;

pub use endpoint::{ClientPlatform, CompanionEndpoint};
pub use error::Error;
pub use probe::{ProbeOutcome, Prober};
pub use transport::TransportConfig;
pub use websocket::{CompanionClient, CompanionSocket};
pub use wire::{CompanionMessage, SnapshotKind, WireSource};
