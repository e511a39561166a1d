//! Lifecycle tests for the delivery engine against an in-memory transport.
//!
//! The mock connector hands out scriptable sessions: sends can be made to
//! fail at chosen positions, inbound frames can be injected, and every
//! session records what it transmitted plus the maximum number of concurrent
//! senders it ever observed.

use async_trait::async_trait;
use beacon_client::{
    ClientConfig, ClientError, ConnectionState, Connector, Result as ClientResult,
    TelemetryClient, Transport,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, Instant};

struct MockSession {
    sent: Mutex<Vec<String>>,
    fail_send_at: Mutex<HashSet<usize>>,
    send_seq: AtomicUsize,
    concurrent_sends: AtomicUsize,
    max_concurrent_sends: AtomicUsize,
    closed: AtomicBool,
    close_count: AtomicUsize,
    closed_notify: Notify,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MockSession {
    fn new(fail_send_at: HashSet<usize>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            fail_send_at: Mutex::new(fail_send_at),
            send_seq: AtomicUsize::new(0),
            concurrent_sends: AtomicUsize::new(0),
            max_concurrent_sends: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            closed_notify: Notify::new(),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    fn sent_matching(&self, needle: &str) -> usize {
        self.sent.lock().iter().filter(|f| f.contains(needle)).count()
    }

    fn max_concurrent_sends(&self) -> usize {
        self.max_concurrent_sends.load(Ordering::SeqCst)
    }

    fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn push_inbound(&self, frame: &str) {
        self.inbound_tx.send(frame.to_string()).unwrap();
    }
}

#[async_trait]
impl Transport for MockSession {
    async fn send(&self, frame: String) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let seq = self.send_seq.fetch_add(1, Ordering::SeqCst);
        let entered = self.concurrent_sends.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_sends.fetch_max(entered, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.concurrent_sends.fetch_sub(1, Ordering::SeqCst);

        if self.fail_send_at.lock().remove(&seq) {
            return Err(ClientError::transport("scripted send failure"));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn receive(&self) -> ClientResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            frame = rx.recv() => frame.ok_or(ClientError::Closed),
            _ = self.closed_notify.notified() => Err(ClientError::Closed),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }
}

#[derive(Default)]
struct MockConnector {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    connects: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    /// Scripted send-failure positions for upcoming sessions, in connect
    /// order. Position 0 on a fresh session is the time-sync frame.
    scripts: Mutex<VecDeque<HashSet<usize>>>,
}

impl MockConnector {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    fn script_send_failures(&self, positions: impl IntoIterator<Item = usize>) {
        self.scripts.lock().push_back(positions.into_iter().collect());
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock()[index].clone()
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> ClientResult<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let fail_send_at = self.scripts.lock().pop_front().unwrap_or_default();
        let session = Arc::new(MockSession::new(fail_send_at));
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}

fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("ws://collector.test:5175");
    config.disconnect_grace_ms = 30;
    config.heartbeat_interval_ms = 10_000;
    config.drain_delay_ms = 1;
    config
}

async fn wait_until(what: &str, timeout_ms: u64, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while !cond() {
        assert!(
            Instant::now() < deadline,
            "timed out after {timeout_ms}ms waiting for: {what}"
        );
        sleep(Duration::from_millis(2)).await;
    }
}

async fn ready_client(connector: &Arc<MockConnector>, config: ClientConfig) -> TelemetryClient {
    let client = TelemetryClient::with_connector(config, connector.clone());
    client.connect();
    {
        let client = client.clone();
        wait_until("session ready", 1_000, move || {
            client.state() == ConnectionState::Ready
        })
        .await;
    }
    client
}

#[tokio::test]
async fn disabled_engine_never_touches_the_transport() {
    let connector = MockConnector::new();
    let client = TelemetryClient::with_connector(ClientConfig::disabled(), connector.clone());

    client.enqueue("x");
    client.connect();
    client.reconnect();
    client.disconnect();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.connects(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.queued(), 0);
}

#[tokio::test]
async fn connect_sends_time_sync_and_reaches_ready() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    let sent = connector.session(0).sent();
    assert_eq!(sent.len(), 1);
    let frame: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(frame["action"], "timeSync");
    let client_time: f64 = frame["payload"]["clientTime"]
        .as_str()
        .expect("clientTime must be a string")
        .parse()
        .expect("clientTime must parse as a float");
    assert!(client_time > 0.0);
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn connect_is_idempotent_while_a_session_is_active() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    client.connect();
    client.connect();
    sleep(Duration::from_millis(30)).await;

    assert_eq!(connector.connects(), 1);
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn frames_enqueued_while_connecting_flush_in_order_after_ready() {
    let connector = MockConnector::new();
    connector.set_connect_delay(Duration::from_millis(40));
    let client = TelemetryClient::with_connector(test_config(), connector.clone());

    client.connect();
    client.enqueue("m1");
    client.enqueue("m2");
    client.enqueue("m3");

    // Still connecting: no session exists, so nothing can have been sent.
    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_eq!(connector.session_count(), 0);
    assert_eq!(client.queued(), 3);

    let session = {
        let c = connector.clone();
        wait_until("all frames flushed", 1_000, move || {
            c.session_count() == 1 && c.session(0).sent().len() == 4
        })
        .await;
        connector.session(0)
    };
    let sent = session.sent();
    assert!(sent[0].contains("timeSync"));
    assert_eq!(&sent[1..], ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn frames_are_delivered_in_enqueue_order() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    let frames: Vec<String> = (0..25).map(|i| format!("frame-{i:02}")).collect();
    for frame in &frames {
        client.enqueue(frame.clone());
    }

    {
        let connector = connector.clone();
        let expected = frames.len() + 1;
        wait_until("all frames sent", 2_000, move || {
            connector.session(0).sent().len() == expected
        })
        .await;
    }

    let sent = connector.session(0).sent();
    assert_eq!(&sent[1..], frames.as_slice());
    assert_eq!(connector.session(0).max_concurrent_sends(), 1);
}

#[tokio::test]
async fn concurrent_enqueue_bursts_share_a_single_drain() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                client.enqueue(format!("w{worker}-{i}"));
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    {
        let connector = connector.clone();
        wait_until("burst fully sent", 2_000, move || {
            connector.session(0).sent().len() == 41
        })
        .await;
    }

    let session = connector.session(0);
    assert_eq!(session.max_concurrent_sends(), 1);
    let sent: HashSet<String> = session.sent().into_iter().collect();
    for worker in 0..4 {
        for i in 0..10 {
            assert!(sent.contains(&format!("w{worker}-{i}")));
        }
    }
}

#[tokio::test]
async fn disconnect_with_backlog_defers_teardown_until_drained() {
    let connector = MockConnector::new();
    let mut config = test_config();
    config.disconnect_grace_ms = 20;
    config.drain_delay_ms = 8;
    let client = ready_client(&connector, config).await;

    let frames: Vec<String> = (0..10).map(|i| format!("backlog-{i}")).collect();
    for frame in &frames {
        client.enqueue(frame.clone());
    }
    client.disconnect();

    sleep(Duration::from_millis(5)).await;
    assert_eq!(client.state(), ConnectionState::Disconnecting);

    {
        let client = client.clone();
        wait_until("deferred teardown", 2_000, move || {
            client.state() == ConnectionState::Disconnected
        })
        .await;
    }

    let session = connector.session(0);
    let sent = session.sent();
    // Every backlog frame went out before the connection was torn down.
    assert_eq!(&sent[1..], frames.as_slice());
    assert_eq!(session.close_count(), 1);
    assert_eq!(client.queued(), 0);
}

#[tokio::test]
async fn disconnect_with_empty_queue_tears_down_after_grace() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    client.disconnect();
    {
        let client = client.clone();
        wait_until("teardown", 1_000, move || {
            client.state() == ConnectionState::Disconnected
        })
        .await;
    }
    assert_eq!(connector.session(0).close_count(), 1);

    // A second disconnect finds nothing to tear down.
    client.disconnect();
    sleep(Duration::from_millis(60)).await;
    assert_eq!(connector.session(0).close_count(), 1);
}

#[tokio::test]
async fn heartbeat_never_fires_before_ready() {
    let connector = MockConnector::new();
    // Position 0 is the time-sync frame: failing it leaves the session open
    // but not ready.
    connector.script_send_failures([0]);
    let mut config = test_config();
    config.heartbeat_interval_ms = 15;
    let client = TelemetryClient::with_connector(config, connector.clone());

    client.connect();
    {
        let connector = connector.clone();
        wait_until("session open", 1_000, move || connector.session_count() == 1).await;
    }
    sleep(Duration::from_millis(80)).await;

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(connector.session(0).sent_matching("heartbeat"), 0);
}

#[tokio::test]
async fn heartbeat_ticks_while_ready_and_stops_after_teardown() {
    let connector = MockConnector::new();
    let mut config = test_config();
    config.heartbeat_interval_ms = 15;
    let client = ready_client(&connector, config).await;

    {
        let connector = connector.clone();
        wait_until("two heartbeats", 1_000, move || {
            connector.session(0).sent_matching("heartbeat") >= 2
        })
        .await;
    }

    client.disconnect();
    {
        let client = client.clone();
        wait_until("teardown", 1_000, move || {
            client.state() == ConnectionState::Disconnected
        })
        .await;
    }

    let after_teardown = connector.session(0).sent_matching("heartbeat");
    sleep(Duration::from_millis(80)).await;
    assert_eq!(
        connector.session(0).sent_matching("heartbeat"),
        after_teardown,
        "no heartbeat may fire after cancellation"
    );
}

#[tokio::test]
async fn send_failure_mid_drain_reconnects_and_retries_the_same_frame() {
    let connector = MockConnector::new();
    // First session: time-sync (0) succeeds, the first queued frame (1) fails.
    connector.script_send_failures([1]);
    let client = ready_client(&connector, test_config()).await;

    client.enqueue("must-not-be-lost");

    {
        let connector = connector.clone();
        wait_until("retry on fresh session", 2_000, move || {
            connector.session_count() == 2
                && connector.session(1).sent_matching("must-not-be-lost") == 1
        })
        .await;
    }

    assert_eq!(connector.connects(), 2);
    // The first session only ever transmitted its time-sync frame.
    let first = connector.session(0).sent();
    assert_eq!(first.len(), 1);
    assert!(first[0].contains("timeSync"));
    // The replacement session re-synced, then delivered the retried frame.
    let second = connector.session(1).sent();
    assert!(second[0].contains("timeSync"));
    assert_eq!(second[1], "must-not-be-lost");
    assert_eq!(client.queued(), 0);
}

#[tokio::test]
async fn request_time_sync_from_the_collector_triggers_a_resync() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    connector
        .session(0)
        .push_inbound(r#"{"action":"requestTimeSync","payload":{}}"#);

    {
        let connector = connector.clone();
        wait_until("second time sync", 1_000, move || {
            connector.session(0).sent_matching("timeSync") == 2
        })
        .await;
    }
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn unknown_and_malformed_inbound_frames_are_ignored() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    let session = connector.session(0);
    session.push_inbound(r#"{"action":"somethingNew","payload":{"x":1}}"#);
    session.push_inbound("definitely not json");
    session.push_inbound(r#"{"payload":{}}"#);
    sleep(Duration::from_millis(30)).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(session.sent_matching("timeSync"), 1);

    // The engine still delivers normally afterwards.
    client.enqueue("after-noise");
    {
        let connector = connector.clone();
        wait_until("frame after noise", 1_000, move || {
            connector.session(0).sent_matching("after-noise") == 1
        })
        .await;
    }
}

#[tokio::test]
async fn session_loss_while_ready_routes_through_disconnect() {
    let connector = MockConnector::new();
    let client = ready_client(&connector, test_config()).await;

    // Simulate the server dropping the connection.
    connector.session(0).close().await;

    {
        let client = client.clone();
        wait_until("disconnected after session loss", 1_000, move || {
            client.state() == ConnectionState::Disconnected
        })
        .await;
    }
}
