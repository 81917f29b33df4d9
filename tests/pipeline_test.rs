//! End-to-end tests for the delivery pipeline against a mock collector.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;

use telemetry_sensor_agent::{
    agent::DeliveryAgent,
    collector::{CollectorClient, CollectorConfig},
    connectivity::{ConnectivityWatcher, Signal},
    sensor::{EventEnvelope, Viewport},
    stats::create_shared_stats,
    FlushOutcome,
};

/// Shared state of the mock collector.
struct MockCollector {
    /// Number of delivery requests received
    requests: AtomicUsize,
    /// When true, respond 500 to deliveries
    fail: AtomicBool,
    /// Raw JSON bodies of accepted deliveries
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl MockCollector {
    fn new() -> Self {
        Self {
            requests: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            payloads: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }
}

async fn ingest(
    State(state): State<Arc<MockCollector>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.requests.fetch_add(1, Ordering::SeqCst);

    if state.fail.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "collector unavailable"})),
        );
    }

    let accepted = body["events"].as_array().map(|a| a.len()).unwrap_or(0);
    state.payloads.lock().unwrap().push(body);
    (
        StatusCode::OK,
        Json(serde_json::json!({"accepted": accepted})),
    )
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Spin up a mock collector on a random port.
async fn start_mock_collector() -> (SocketAddr, Arc<MockCollector>) {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let state = Arc::new(MockCollector::new());

    let app = Router::new()
        .route("/v1/events", post(ingest))
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind mock collector");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, state)
}

/// Spin up a mock collector on a specific address.
async fn start_mock_collector_at(addr: SocketAddr) -> Arc<MockCollector> {
    let state = Arc::new(MockCollector::new());

    let app = Router::new()
        .route("/v1/events", post(ingest))
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind mock collector");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    state
}

fn agent_for(
    addr: SocketAddr,
    spool_dir: &std::path::Path,
    batch_size: usize,
) -> DeliveryAgent {
    let client = CollectorClient::new(CollectorConfig::new(format!("http://{addr}"), None));
    let mut agent = DeliveryAgent::new(
        spool_dir.join("events.jsonl"),
        batch_size,
        client,
        create_shared_stats(),
    );
    agent.activate().expect("Failed to open spool");
    agent
}

fn envelope(key: &str) -> EventEnvelope {
    EventEnvelope::key_down("https://example.com/page", Viewport::default(), key)
}

#[tokio::test]
async fn test_simple_flush() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 50);

    agent.accept_event(envelope("e1"));
    agent.accept_event(envelope("e2"));
    assert_eq!(agent.batch_len(), 2);

    let outcome = agent.flush().await;
    assert_eq!(outcome, FlushOutcome::Delivered(2));
    assert_eq!(agent.pending(), 0);

    // One request, carrying both events.
    assert_eq!(mock.request_count(), 1);
    let payloads = mock.payloads();
    assert_eq!(payloads[0]["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_payload_wire_shape() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 50);
    let session_id = agent.session_id().to_string();

    agent.accept_event(envelope("Enter"));
    agent.flush().await;

    let payload = &mock.payloads()[0];
    assert_eq!(payload["session_id"], session_id.as_str());
    assert!(payload["ts"].is_i64());

    let entry = &payload["events"][0];
    assert_eq!(entry["session_id"], session_id.as_str());
    assert_eq!(entry["event_type"], "key-down");
    assert!(entry["received_at"].is_string());
    assert_eq!(entry["payload"]["key"], "Enter");
    assert_eq!(entry["payload"]["origin_url"], "https://example.com/page");
}

#[tokio::test]
async fn test_offline_retry() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 50);

    mock.set_failing(true);
    agent.accept_event(envelope("e1"));
    assert_eq!(agent.flush().await, FlushOutcome::Failed);

    // The entry survived the failed delivery.
    assert_eq!(agent.spool_len(), 1);

    // Connectivity restored: the retry delivers the same entry and clears.
    mock.set_failing(false);
    assert_eq!(agent.flush().await, FlushOutcome::Delivered(1));
    assert_eq!(agent.pending(), 0);

    let payloads = mock.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["events"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connectivity_restoration_signals_and_retries() {
    // Reserve a port, then release it so the collector starts unreachable.
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 50);

    // An event spooled during the offline period.
    agent.accept_event(envelope("offline"));
    assert_eq!(agent.flush().await, FlushOutcome::Failed);
    assert_eq!(agent.spool_len(), 1);

    let running = Arc::new(AtomicBool::new(true));
    let watcher = ConnectivityWatcher::spawn(
        CollectorConfig::new(format!("http://{addr}"), None),
        Duration::from_millis(50),
        running.clone(),
    )
    .expect("Failed to spawn watcher");
    let signals = watcher.receiver().clone();

    // Let the watcher observe the offline state before the collector comes up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(signals.try_recv().is_err());

    let mock = start_mock_collector_at(addr).await;

    // The offline → online edge emits exactly one restoration signal.
    let signal = tokio::task::spawn_blocking(move || signals.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(signal, Ok(Signal::ConnectivityRestored));

    // The flush the signal triggers delivers the spooled entry.
    assert_eq!(agent.flush().await, FlushOutcome::Delivered(1));
    assert_eq!(agent.pending(), 0);
    assert_eq!(mock.request_count(), 1);

    running.store(false, Ordering::SeqCst);
    watcher.join();
}

#[tokio::test]
async fn test_no_loss_on_delivery_failure() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 2);

    mock.set_failing(true);
    for key in ["a", "b", "c"] {
        agent.accept_event(envelope(key));
    }
    let spooled_before = agent.spool_len();

    agent.flush().await;

    // A failed delivery never removes entries; the flush's own spill may add.
    assert!(agent.spool_len() >= spooled_before);
    assert_eq!(agent.spool_len(), 3);
}

#[tokio::test]
async fn test_flush_on_empty_store_makes_no_request() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 50);

    agent.accept_event(envelope("e1"));
    assert_eq!(agent.flush().await, FlushOutcome::Delivered(1));
    assert_eq!(mock.request_count(), 1);

    // Immediate second flush: store is empty, nothing goes on the wire.
    assert_eq!(agent.flush().await, FlushOutcome::Idle);
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test]
async fn test_threshold_spill_before_any_flush() {
    let (addr, _mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 50);

    for i in 0..50 {
        agent.accept_event(envelope(&format!("k{i}")));
    }

    assert_eq!(agent.batch_len(), 0);
    assert_eq!(agent.spool_len(), 50);
}

#[tokio::test]
async fn test_at_least_once_across_agent_restart() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();

    // First agent lifetime: entry reaches the spool but is never flushed.
    let old_session;
    {
        let mut agent = agent_for(addr, dir.path(), 1);
        old_session = agent.session_id().to_string();
        agent.accept_event(envelope("survivor"));
        assert_eq!(agent.spool_len(), 1);
    }

    // Recreated agent flushes the recovered entry under its new session id;
    // the entry itself keeps the session it was accepted under.
    let mut agent = agent_for(addr, dir.path(), 1);
    assert_eq!(agent.flush().await, FlushOutcome::Delivered(1));

    let payload = &mock.payloads()[0];
    assert_eq!(payload["session_id"], agent.session_id());
    assert_eq!(payload["events"][0]["session_id"], old_session.as_str());
}

#[tokio::test]
async fn test_flush_includes_in_memory_batch() {
    let (addr, mock) = start_mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_for(addr, dir.path(), 3);

    // Four events: three spill at the threshold, one stays in memory.
    for key in ["a", "b", "c", "d"] {
        agent.accept_event(envelope(key));
    }
    assert_eq!(agent.batch_len(), 1);
    assert_eq!(agent.spool_len(), 3);

    assert_eq!(agent.flush().await, FlushOutcome::Delivered(4));
    assert_eq!(mock.payloads()[0]["events"].as_array().unwrap().len(), 4);
}
