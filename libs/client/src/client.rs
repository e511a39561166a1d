//! Connection controller, queue drainer, and heartbeat.
//!
//! All mutable state — connection state, outbound queue, the drain and
//! pending-disconnect flags, the session and heartbeat handles — lives in one
//! mutex-guarded struct. The lock is only ever held to read or mutate that
//! struct; it is never held across a suspension point that calls the
//! transport, so the engine cannot deadlock against the session's own
//! synchronization.
//!
//! Every public operation is fire-and-forget: it appends or flips state under
//! the lock, spawns whatever background work is needed, and returns without
//! ever surfacing a failure to the caller.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use beacon_wire::{
    clock, envelope::ACTION_REQUEST_TIME_SYNC, Envelope, HeartbeatPayload, TimeSyncPayload,
};

use crate::config::ClientConfig;
use crate::queue::OutboundQueue;
use crate::transport::{Connector, Transport, WsConnector};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// A session open is in flight.
    Connecting,
    /// Session open, time sync not yet confirmed. Heartbeat and drain do not
    /// run in this state.
    Connected,
    /// Time sync confirmed; heartbeat and drain are eligible.
    Ready,
    /// Teardown requested; waiting on the grace period or a deferred drain.
    Disconnecting,
}

/// Everything the engine mutates, guarded by a single mutex.
struct EngineState {
    state: ConnectionState,
    session: Option<Arc<dyn Transport>>,
    queue: OutboundQueue,
    /// At most one drain loop per connection lifetime; check-and-set under
    /// the lock before starting work.
    draining: bool,
    /// Disconnect requested while the queue was non-empty; the drainer runs
    /// the deferred teardown once it empties the queue.
    pending_disconnect: bool,
    heartbeat: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<EngineState>,
}

/// Client-side telemetry engine: owns the collector connection and the
/// outbound delivery queue.
///
/// Cheap to clone; all clones share the same engine. Public operations must
/// be called from within a tokio runtime.
#[derive(Clone)]
pub struct TelemetryClient {
    inner: Arc<Inner>,
}

impl TelemetryClient {
    /// Engine over the production WebSocket connector.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Engine over a caller-supplied connector. Tests use this to substitute
    /// an in-memory transport.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: Mutex::new(EngineState {
                    state: ConnectionState::Disconnected,
                    session: None,
                    queue: OutboundQueue::new(),
                    draining: false,
                    pending_disconnect: false,
                    heartbeat: None,
                }),
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Number of frames awaiting transmission.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Origin label façade callers stamp on their envelopes.
    pub fn origin(&self) -> &str {
        &self.inner.config.origin
    }

    /// Whether an endpoint is configured at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.config.endpoint.is_some()
    }

    /// Open a session to the collector. No-op without an endpoint or unless
    /// currently disconnected.
    pub fn connect(&self) {
        let Some(url) = self.inner.config.endpoint.clone() else {
            trace!("no collector endpoint configured, connect is a no-op");
            return;
        };
        {
            let mut st = self.inner.state.lock();
            if st.state != ConnectionState::Disconnected {
                return;
            }
            st.state = ConnectionState::Connecting;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            Inner::open_session(inner, url).await;
        });
    }

    /// Request teardown. Waits the grace period for in-flight sends; if the
    /// queue is still non-empty, teardown is deferred to the drainer.
    pub fn disconnect(&self) {
        if !self.is_enabled() {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            Inner::run_disconnect(inner).await;
        });
    }

    /// Drop the current session and open a fresh one, exactly once, with no
    /// backoff. Repeated failures retrigger on each subsequent send or
    /// heartbeat failure.
    pub fn reconnect(&self) {
        if !self.is_enabled() {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            Inner::run_reconnect(inner).await;
        });
    }

    /// Append a pre-serialized frame to the outbound queue and kick the
    /// drainer if it is idle and the session is ready. Never blocks, never
    /// fails; without an endpoint the frame is dropped silently.
    pub fn enqueue(&self, frame: impl Into<String>) {
        if !self.is_enabled() {
            trace!("no collector endpoint configured, dropping frame");
            return;
        }
        Inner::enqueue_frame(&self.inner, frame.into());
    }
}

impl Inner {
    /// Connect flow shared by `connect` and `reconnect`: open a fresh
    /// session, start its receive loop, then run the time-sync handshake.
    /// Caller has already set the state to `Connecting`.
    async fn open_session(inner: Arc<Inner>, url: String) {
        match inner.connector.connect(&url).await {
            Ok(session) => {
                {
                    let mut st = inner.state.lock();
                    st.state = ConnectionState::Connected;
                    st.session = Some(session.clone());
                }
                info!(%url, "collector session open");
                Inner::spawn_receive_loop(inner.clone(), session.clone());
                Inner::run_time_sync(inner, session).await;
            }
            Err(e) => {
                warn!(%url, error = %e, "collector connect failed");
                inner.state.lock().state = ConnectionState::Disconnected;
            }
        }
    }

    /// Send the `timeSync` handshake on the given session. A successful send
    /// promotes `Connected` to `Ready` and starts heartbeat and drain. A
    /// failed send leaves the state as-is; there is no automatic retry — the
    /// collector's `requestTimeSync` or a reconnect re-runs it.
    async fn run_time_sync(inner: Arc<Inner>, session: Arc<dyn Transport>) {
        let envelope = Envelope::TimeSync(TimeSyncPayload {
            client_time: clock::client_time(),
        });
        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode time sync envelope");
                return;
            }
        };

        match session.send(frame).await {
            Ok(()) => {
                let eligible = {
                    let mut st = inner.state.lock();
                    let current = st
                        .session
                        .as_ref()
                        .map(|s| Arc::ptr_eq(s, &session))
                        .unwrap_or(false);
                    if current && st.state == ConnectionState::Connected {
                        st.state = ConnectionState::Ready;
                    }
                    current && st.state == ConnectionState::Ready
                };
                if eligible {
                    debug!("time sync sent, session ready");
                    Inner::start_heartbeat(&inner);
                    Inner::start_drain(&inner);
                }
            }
            Err(e) => {
                warn!(error = %e, "time sync send failed, session not ready");
            }
        }
    }

    /// One receive loop per session. Exits permanently on receive failure;
    /// only a reconnect or a fresh `connect` resumes receiving, on a new
    /// session.
    fn spawn_receive_loop(inner: Arc<Inner>, session: Arc<dyn Transport>) {
        tokio::spawn(async move {
            loop {
                match session.receive().await {
                    Ok(frame) => {
                        Inner::handle_inbound(&inner, &session, &frame).await;
                    }
                    Err(e) => {
                        debug!(error = %e, "receive loop terminated");
                        Inner::on_session_lost(&inner, &session);
                        break;
                    }
                }
            }
        });
    }

    /// Route one inbound frame. Only `requestTimeSync` is understood; any
    /// other action is ignored.
    async fn handle_inbound(inner: &Arc<Inner>, session: &Arc<dyn Transport>, frame: &str) {
        match beacon_wire::envelope::peek_action(frame) {
            Some(action) if action == ACTION_REQUEST_TIME_SYNC => {
                debug!("collector requested time sync");
                Inner::run_time_sync(inner.clone(), session.clone()).await;
            }
            Some(action) => {
                trace!(%action, "ignoring unknown collector action");
            }
            None => {
                trace!("ignoring malformed collector frame");
            }
        }
    }

    /// Session-level close or error. Routes an open session through the
    /// disconnect path; stale loops from already-replaced sessions do
    /// nothing.
    fn on_session_lost(inner: &Arc<Inner>, session: &Arc<dyn Transport>) {
        let teardown = {
            let st = inner.state.lock();
            let current = st
                .session
                .as_ref()
                .map(|s| Arc::ptr_eq(s, session))
                .unwrap_or(false);
            current
                && matches!(
                    st.state,
                    ConnectionState::Connected | ConnectionState::Ready
                )
        };
        if teardown {
            let inner = inner.clone();
            tokio::spawn(async move {
                Inner::run_disconnect(inner).await;
            });
        }
    }

    async fn run_disconnect(inner: Arc<Inner>) {
        {
            let mut st = inner.state.lock();
            if matches!(
                st.state,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            ) {
                return;
            }
            st.state = ConnectionState::Disconnecting;
        }

        // Grace period for in-flight sends.
        sleep(inner.config.disconnect_grace()).await;

        let deferred = {
            let mut st = inner.state.lock();
            if st.queue.is_empty() {
                false
            } else {
                st.pending_disconnect = true;
                true
            }
        };
        if deferred {
            debug!("queue non-empty at disconnect, deferring teardown to drainer");
            return;
        }
        Inner::teardown(&inner).await;
    }

    /// Close the session, cancel the heartbeat, reset to `Disconnected`.
    /// Idempotent: a second call finds nothing left to close.
    async fn teardown(inner: &Arc<Inner>) {
        let (session, heartbeat) = {
            let mut st = inner.state.lock();
            st.state = ConnectionState::Disconnected;
            st.pending_disconnect = false;
            (st.session.take(), st.heartbeat.take())
        };
        if let Some(handle) = heartbeat {
            handle.abort();
        }
        if let Some(session) = session {
            session.close().await;
        }
        info!("collector session closed");
    }

    /// Drop the current session and attempt exactly one fresh open.
    /// Concurrent triggers coalesce while an open is already in flight.
    async fn run_reconnect(inner: Arc<Inner>) {
        let Some(url) = inner.config.endpoint.clone() else {
            return;
        };
        let (session, heartbeat) = {
            let mut st = inner.state.lock();
            if matches!(
                st.state,
                ConnectionState::Connecting | ConnectionState::Disconnected
            ) {
                return;
            }
            st.state = ConnectionState::Connecting;
            (st.session.take(), st.heartbeat.take())
        };
        if let Some(handle) = heartbeat {
            handle.abort();
        }
        if let Some(session) = session {
            session.close().await;
        }
        info!(%url, "reconnecting to collector");
        Inner::open_session(inner, url).await;
    }

    fn enqueue_frame(inner: &Arc<Inner>, frame: String) {
        {
            let mut st = inner.state.lock();
            st.queue.push(frame);
        }
        Inner::start_drain(inner);
    }

    /// Start the drain loop. No-op unless the session is ready and no drain
    /// is already in flight.
    fn start_drain(inner: &Arc<Inner>) {
        {
            let mut st = inner.state.lock();
            if st.state != ConnectionState::Ready || st.draining {
                return;
            }
            st.draining = true;
        }
        let inner = inner.clone();
        tokio::spawn(async move {
            Inner::run_drain(inner).await;
        });
    }

    /// Single-flight drain loop: transmit the head frame, pop it only on a
    /// confirmed send, yield briefly, repeat until the queue is empty. A send
    /// failure triggers a reconnect and ends this loop; the head frame stays
    /// queued and the `Ready` transition of the fresh session restarts the
    /// drain from the same frame (at-least-once, never dropped).
    async fn run_drain(inner: Arc<Inner>) {
        trace!("drain started");
        let mut send_failed = false;
        loop {
            let step = {
                let st = inner.state.lock();
                match (st.queue.front(), st.session.as_ref()) {
                    (Some(frame), Some(session)) => Some((frame.to_string(), session.clone())),
                    // Session gone mid-drain: stop rather than spin; the next
                    // Ready transition resumes from the same head.
                    _ => None,
                }
            };
            let Some((frame, session)) = step else {
                break;
            };

            match session.send(frame).await {
                Ok(()) => {
                    inner.state.lock().queue.pop_front();
                }
                Err(e) => {
                    warn!(error = %e, "send failed mid-drain, reconnecting");
                    send_failed = true;
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        Inner::run_reconnect(inner).await;
                    });
                    break;
                }
            }

            // Inter-send yield so the drain cannot starve other tasks.
            sleep(inner.config.drain_delay()).await;
        }

        // Clear the flag, then re-check: a frame enqueued between the empty
        // observation above and this point must not wait for the next tick.
        let (deferred_teardown, restart) = {
            let mut st = inner.state.lock();
            st.draining = false;
            let deferred = st.pending_disconnect && st.queue.is_empty();
            let restart =
                !send_failed && !st.queue.is_empty() && st.state == ConnectionState::Ready;
            (deferred, restart)
        };
        if deferred_teardown {
            debug!("queue drained, running deferred teardown");
            Inner::teardown(&inner).await;
        } else if restart {
            Inner::start_drain(&inner);
        }
        trace!("drain finished");
    }

    /// Start the keep-alive timer. Idempotent while a heartbeat task exists;
    /// the task checks state on every tick and exits once the session leaves
    /// `Ready`, so no tick fires after cancellation.
    fn start_heartbeat(inner: &Arc<Inner>) {
        let mut st = inner.state.lock();
        if st.heartbeat.is_some() {
            return;
        }
        let task_inner = inner.clone();
        st.heartbeat = Some(tokio::spawn(async move {
            let period = task_inner.config.heartbeat_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if task_inner.state.lock().state != ConnectionState::Ready {
                    break;
                }
                match Envelope::Heartbeat(HeartbeatPayload {}).to_json() {
                    Ok(frame) => {
                        trace!("heartbeat");
                        Inner::enqueue_frame(&task_inner, frame);
                    }
                    Err(e) => {
                        // Unreachable for a constant payload; treat it as a
                        // session fault rather than enqueueing garbage.
                        error!(error = %e, "heartbeat encode failed, reconnecting");
                        let inner = task_inner.clone();
                        tokio::spawn(async move {
                            Inner::run_reconnect(inner).await;
                        });
                    }
                }
            }
        }));
    }
}
