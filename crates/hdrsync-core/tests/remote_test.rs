// End to end: engine + real companion client against a loopback socket.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hdrsync_core::{
    ClientPlatform, Companion, CompanionEndpoint, DurableStore, Engine, EngineConfig,
    HeaderRuleEntry, MemoryNetworkLayer, MemoryStore, NetworkLayer, RemoteCompanion,
};

/// Serve every WebSocket client one snapshot and keep the socket open.
/// Plain HTTP requests (the probe) fail the upgrade and are dropped.
async fn companion(snapshot: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    return;
                };
                if ws.send(Message::text(snapshot)).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    port
}

#[tokio::test]
async fn test_snapshot_from_companion_is_installed() {
    let port = companion(
        r#"{"type":"sourcesInitial","sources":[{"sourceId":"1","sourceType":"http","sourceContent":"abc"}]}"#,
    )
    .await;

    let config = EngineConfig {
        endpoint: CompanionEndpoint {
            port,
            ..CompanionEndpoint::default()
        },
        platform: ClientPlatform::Standard,
        ..EngineConfig::default()
    };
    let store = Arc::new(MemoryStore::with_rules([
        HeaderRuleEntry::new_dynamic("r1", "X-Token", "1").with_domains(["example.com"]),
    ]));
    let network = Arc::new(MemoryNetworkLayer::new());
    let remote = RemoteCompanion::new(&config).unwrap();
    assert_eq!(remote.socket_url().port(), Some(port));

    let engine = Engine::start(
        config,
        Arc::clone(&store) as Arc<dyn DurableStore>,
        Arc::clone(&network) as Arc<dyn NetworkLayer>,
        Arc::new(remote) as Arc<dyn Companion>,
    );

    let mut live = network.subscribe();
    tokio::time::timeout(
        Duration::from_secs(10),
        live.wait_for(|rules| rules.first().and_then(|r| r.value_for("x-token")) == Some("abc")),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(store.load_cached_sources().await.unwrap().len(), 1);
    assert!(engine.handle().connection_state().borrow().is_connected());

    engine.shutdown().await;
}
