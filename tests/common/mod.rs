//! Shared helpers for integration tests: an embedded MQTT broker, a mock
//! backend webhook server, and a driven publisher client.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};

/// Embedded MQTT broker for tests, one per port.
pub struct TestBroker {
    _thread: thread::JoinHandle<()>,
    pub port: u16,
}

/// Starts an embedded broker with a v4 listener on 127.0.0.1:`port` and
/// waits until the listener accepts connections.
pub async fn start_broker(port: u16) -> TestBroker {
    let router = RouterConfig {
        max_connections: 100,
        max_outgoing_packet_count: 10_000,
        max_segment_size: 1024 * 1024,
        max_segment_count: 100,
        ..Default::default()
    };

    let connections = ConnectionSettings {
        connection_timeout_ms: 60_000,
        max_payload_size: 1024 * 1024,
        max_inflight_count: 100,
        auth: None,
        external_auth: None,
        dynamic_filters: true,
    };

    let listen: SocketAddr = format!("127.0.0.1:{}", port).parse().expect("listen addr");
    let server = ServerSettings {
        name: format!("test-broker-{}", port),
        listen,
        tls: None,
        next_connection_delay_ms: 1,
        connections,
    };

    let mut v4_servers = HashMap::new();
    v4_servers.insert("1".to_string(), server);

    let config = Config {
        id: 0,
        router,
        v4: Some(v4_servers),
        v5: None,
        ws: None,
        cluster: None,
        console: None,
        bridge: None,
        prometheus: None,
        metrics: None,
    };

    let mut broker = Broker::new(config);
    let handle = thread::spawn(move || {
        if let Err(err) = broker.start() {
            eprintln!("test broker error: {:?}", err);
        }
    });

    // Probe the listener until the broker is ready.
    let addr = format!("127.0.0.1:{}", port);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if std::net::TcpStream::connect(&addr).is_ok() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "test broker failed to start on port {}",
            port
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    TestBroker {
        _thread: handle,
        port,
    }
}

/// One webhook delivery captured by the mock backend.
#[derive(Debug, Clone)]
pub struct RecordedForward {
    pub subscription_id: i64,
    pub token: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Clone)]
struct MockState {
    forwards: Arc<Mutex<Vec<RecordedForward>>>,
    check_status: Arc<AtomicU16>,
    forward_status: Arc<AtomicU16>,
}

/// In-process stand-in for the backend webhook interface. Records every
/// delivery and lets tests choose the status codes it answers with.
pub struct MockBackend {
    addr: SocketAddr,
    state: MockState,
}

impl MockBackend {
    pub async fn start() -> MockBackend {
        let state = MockState {
            forwards: Arc::new(Mutex::new(Vec::new())),
            check_status: Arc::new(AtomicU16::new(200)),
            forward_status: Arc::new(AtomicU16::new(200)),
        };

        let app = Router::new()
            .route("/mqtt/check", get(handle_check))
            .route("/mqtt/topics/:id/on_message", post(handle_on_message))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        MockBackend { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Status the health check answers with (default 200).
    pub fn set_check_status(&self, status: u16) {
        self.state.check_status.store(status, Ordering::SeqCst);
    }

    /// Status webhook deliveries are answered with (default 200).
    pub fn set_forward_status(&self, status: u16) {
        self.state.forward_status.store(status, Ordering::SeqCst);
    }

    pub fn forwards(&self) -> Vec<RecordedForward> {
        self.state.forwards.lock().expect("forwards lock").clone()
    }

    /// Polls until at least `count` deliveries arrived. Returns false if
    /// the deadline passed first.
    pub async fn wait_for_forwards(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.forwards().len() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

async fn handle_check(State(state): State<MockState>) -> StatusCode {
    StatusCode::from_u16(state.check_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn handle_on_message(
    Path(id): Path<i64>,
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let token = headers
        .get("X-MQTT-Auth-Token")
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    state
        .forwards
        .lock()
        .expect("forwards lock")
        .push(RecordedForward {
            subscription_id: id,
            token,
            payload,
        });
    StatusCode::from_u16(state.forward_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Connects a publisher client to the test broker and drives its event
/// loop in the background.
pub async fn connect_publisher(port: u16, client_id: &str) -> AsyncClient {
    let mut options = MqttOptions::new(client_id, "127.0.0.1", port);
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    tokio::spawn(async move {
        loop {
            if eventloop.poll().await.is_err() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    });
    // Let the connection establish before tests publish.
    tokio::time::sleep(Duration::from_millis(200)).await;
    client
}

/// Publishes one message and gives the broker a moment to route it.
pub async fn publish(client: &AsyncClient, topic: &str, payload: &[u8]) {
    client
        .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
        .await
        .expect("publish");
    tokio::time::sleep(Duration::from_millis(100)).await;
}
