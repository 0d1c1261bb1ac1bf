#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fieldhub_cockpit::CockpitServer;
use fieldhub_kernel::{FileStore, Gateway, GatewayHandle, PersistenceScheduler};
use fieldhub_middleware::{Broadcaster, EventBus};
use fieldhub_types::{Address, ConfigDocument, DeviceDescriptor, HttpSettings, Unit};
use futures_util::StreamExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A full gateway stack on an ephemeral loopback port.
pub struct Stack {
    pub gateway: GatewayHandle,
    pub addr: SocketAddr,
    /// Where the realtime channel listens; equal to `addr` when shared.
    pub ws_addr: SocketAddr,
    _stop: watch::Sender<bool>,
    _dir: TempDir,
}

impl Stack {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/", self.ws_addr))
            .await
            .expect("websocket connect");
        client
    }
}

pub fn descriptor(unit: u8, address: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(Unit::new(unit).expect("nonzero unit"), Address::new(address))
}

/// Config with devices A (unit 1) and B (unit 2).
pub fn two_devices() -> ConfigDocument {
    ConfigDocument {
        devices: vec![
            descriptor(1, "AA:BB:CC:00:00:01"),
            descriptor(2, "AA:BB:CC:00:00:02"),
        ],
        ..ConfigDocument::default()
    }
}

pub async fn start(config: ConfigDocument) -> Stack {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileStore::new(dir.path().join("config.json")));
    let (persistence, _) =
        PersistenceScheduler::new(store, Duration::from_millis(config.persistence.delay)).spawn();

    let bus = EventBus::default();
    let broadcaster = Broadcaster::new(Broadcaster::ping_interval_from_millis(
        config.ws.ping_interval,
    ));
    broadcaster.clone().spawn(bus.subscribe());

    let mut gateway = Gateway::new(config.clone(), persistence);
    gateway.observe(Arc::new(bus));
    let (gateway, _) = gateway.spawn();

    let http = HttpSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..HttpSettings::default()
    };
    let server = CockpitServer::new(gateway.clone(), broadcaster)
        .with_http(http)
        .with_ws(config.ws.clone())
        .bind()
        .await
        .expect("bind");
    let addr = server.http_addr().expect("http listener");
    let ws_addr = server.ws_addr().expect("ws listener");

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(server.serve(shutdown));

    Stack {
        gateway,
        addr,
        ws_addr,
        _stop: stop,
        _dir: dir,
    }
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("ephemeral port")
        .port()
}

/// Next text frame as JSON, failing after five seconds.
pub async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("frame is JSON");
        }
    }
}
