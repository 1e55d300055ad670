//! Resilient feature-stream connection.
//!
//! One connection task per [`ConnectionHandle`] drives the state machine:
//!
//! ```text
//! Connecting ──socket──▶ Handshaking ──reply ok──▶ Open
//!     ▲  │ fail: backoff          │ violation/timeout   │ close (any code)
//!     │  └──▶ (retry)             ▼                     │
//!     └───────────────────────── Closed ◀── destroy ────┘ (reconnect unless destroyed)
//! ```
//!
//! Every suspension point (connect, backoff sleep, handshake wait, socket
//! read) races a cancellation token, so `destroy()` cancels pending timers
//! and no reconnect can fire after teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::StreamError;
use crate::protocol::{
    CLOSE_NORMAL, CapabilityMismatch, Feature, HandshakeRequest, decode_feature_result,
    validate_handshake_reply,
};
use crate::transport::{Connector, FeatureSocket, SocketEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Open,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Externally observable status: connected while the handshake is pending
    /// or completed, disconnected otherwise.
    pub fn status(self) -> ConnectionStatus {
        match self {
            ConnectionState::Handshaking | ConnectionState::Open => ConnectionStatus::Connected,
            ConnectionState::Connecting | ConnectionState::Closed => {
                ConnectionStatus::Disconnected
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream consumer of a connection.
///
/// `on_feature` is called once per feature in arrival order;
/// `on_status_change` whenever the observable status changes.
pub trait StreamObserver: Send + 'static {
    fn on_feature(&mut self, feature: Feature);
    fn on_status_change(&mut self, status: ConnectionStatus);
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Feature(Feature),
    Status(ConnectionStatus),
}

impl StreamObserver for mpsc::UnboundedSender<StreamEvent> {
    fn on_feature(&mut self, feature: Feature) {
        let _ = self.send(StreamEvent::Feature(feature));
    }

    fn on_status_change(&mut self, status: ConnectionStatus) {
        let _ = self.send(StreamEvent::Status(status));
    }
}

/// Owner-side handle of a running connection. Dropping it destroys the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    cancel: CancellationToken,
    destroyed: Arc<AtomicBool>,
    state: watch::Receiver<ConnectionState>,
    last_error: Arc<Mutex<Option<String>>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Current state. Reads `Closed` as soon as the connection is destroyed,
    /// even before the task has finished tearing the socket down.
    pub fn state(&self) -> ConnectionState {
        if self.is_destroyed() {
            return ConnectionState::Closed;
        }
        *self.state.borrow()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state().status()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Last diagnostic: a socket error event or the error that destroyed the connection.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Tear the connection down for good. Idempotent.
    ///
    /// Effective immediately for every pending suspension point; the task then
    /// closes the socket and reports `disconnected` once.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
    }

    /// Wait until the connection task reached `Closed`.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub struct ConnectionManager;

impl ConnectionManager {
    /// Spawn the connection task. Starts in `Connecting`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<C, O>(config: ConnectionConfig, connector: C, observer: O) -> ConnectionHandle
    where
        C: Connector,
        O: StreamObserver,
    {
        let cancel = CancellationToken::new();
        let destroyed = Arc::new(AtomicBool::new(false));
        let last_error = Arc::new(Mutex::new(None));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let session = Session {
            request: config.handshake_request(),
            config,
            connector,
            reporter: StatusReporter::new(observer),
            cancel: cancel.clone(),
            destroyed: destroyed.clone(),
            state: state_tx,
            last_error: last_error.clone(),
        };
        let task = tokio::spawn(session.run());

        ConnectionHandle {
            cancel,
            destroyed,
            state: state_rx,
            last_error,
            task: Some(task),
        }
    }
}

/// Forwards features and de-duplicates status reports.
struct StatusReporter<O> {
    observer: O,
    last: Option<ConnectionStatus>,
}

impl<O: StreamObserver> StatusReporter<O> {
    fn new(observer: O) -> Self {
        Self {
            observer,
            last: None,
        }
    }

    fn report(&mut self, status: ConnectionStatus) {
        if self.last == Some(status) {
            return;
        }
        self.last = Some(status);
        self.observer.on_status_change(status);
    }

    fn feature(&mut self, feature: Feature) {
        self.observer.on_feature(feature);
    }
}

enum HandshakeOutcome {
    Accepted(Vec<CapabilityMismatch>),
    Rejected(StreamError),
    Closed(u16),
    Cancelled,
}

enum SessionEnd {
    Closed(u16),
    Violation(StreamError),
    Cancelled,
}

struct Session<C, O> {
    config: ConnectionConfig,
    request: HandshakeRequest,
    connector: C,
    reporter: StatusReporter<O>,
    cancel: CancellationToken,
    destroyed: Arc<AtomicBool>,
    state: watch::Sender<ConnectionState>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl<C: Connector, O: StreamObserver> Session<C, O> {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let Some(mut socket) = self.connect_with_backoff().await else {
                break;
            };

            self.set_state(ConnectionState::Handshaking);
            match self.handshake(&mut socket).await {
                HandshakeOutcome::Accepted(mismatches) => {
                    for m in mismatches {
                        warn!("websocket-connection: {m}");
                    }
                }
                HandshakeOutcome::Rejected(e) => {
                    error!("websocket-connection: handshake failed: {e}");
                    *self.last_error.lock() = Some(e.to_string());
                    self.destroy_internal();
                    socket.close().await;
                    break;
                }
                HandshakeOutcome::Closed(code) => {
                    self.log_close(code);
                    if self.is_destroyed() {
                        break;
                    }
                    continue;
                }
                HandshakeOutcome::Cancelled => {
                    socket.close().await;
                    break;
                }
            }

            self.set_state(ConnectionState::Open);
            self.reporter.report(ConnectionStatus::Connected);
            info!("websocket-connection: connected to {}", self.config.source);

            match self.stream_features(&mut socket).await {
                SessionEnd::Closed(code) => {
                    self.log_close(code);
                    self.reporter.report(ConnectionStatus::Disconnected);
                    if self.is_destroyed() {
                        break;
                    }
                }
                SessionEnd::Violation(e) => {
                    error!("websocket-connection: {e}");
                    *self.last_error.lock() = Some(e.to_string());
                    self.destroy_internal();
                    socket.close().await;
                    break;
                }
                SessionEnd::Cancelled => {
                    socket.close().await;
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        self.reporter.report(ConnectionStatus::Disconnected);
        debug!("websocket-connection: closed");
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Self-inflicted destroy: no reconnect follows. Observers of the state
    /// see `Closed` before the socket is torn down.
    fn destroy_internal(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Closed);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn log_close(&self, code: u16) {
        if code != CLOSE_NORMAL {
            warn!("websocket-connection: closed unexpectedly with error code {code}");
        }
    }

    fn record_error(&self, error: String) {
        warn!("websocket-connection: encountered an error: {error}");
        *self.last_error.lock() = Some(error);
    }

    /// Connect, retrying with backoff. `None` when destroyed or out of attempts.
    async fn connect_with_backoff(&mut self) -> Option<C::Socket> {
        let mut backoff = self.config.backoff();
        loop {
            if self.is_destroyed() {
                return None;
            }
            debug!(
                "websocket-connection: connecting to {} (retry {})",
                self.config.source,
                backoff.retries()
            );
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                r = self.connector.connect(&self.config.source) => r,
            };

            match attempt {
                Ok(mut socket) => {
                    if self.is_destroyed() {
                        socket.close().await;
                        return None;
                    }
                    return Some(socket);
                }
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        error!(
                            "websocket-connection: exceeded {} reconnection attempts, no further attempts will be made ({e})",
                            self.config.max_reconnection_attempts
                        );
                        self.destroy_internal();
                        return None;
                    };
                    warn!(
                        "websocket-connection: failed to connect ({e}), reconnecting in {:.1}s",
                        delay.as_secs_f64()
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn handshake(&mut self, socket: &mut C::Socket) -> HandshakeOutcome {
        let text = match self.request.encode() {
            Ok(t) => t,
            Err(e) => return HandshakeOutcome::Rejected(StreamError::Config(e.to_string())),
        };
        if let Err(e) = socket.send_text(text).await {
            // The close event that follows a failed write drives the reconnect.
            self.record_error(e.to_string());
        }

        let timeout = self.config.handshake_timeout();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return HandshakeOutcome::Cancelled,
                _ = &mut deadline => {
                    return HandshakeOutcome::Rejected(StreamError::HandshakeTimeout(timeout));
                }
                ev = socket.next_event() => ev,
            };

            match event {
                SocketEvent::Text(reply) => {
                    return match validate_handshake_reply(&reply, &self.request) {
                        Ok(mismatches) => HandshakeOutcome::Accepted(mismatches),
                        Err(v) => {
                            debug!("websocket-connection: rejected handshake reply {reply}");
                            HandshakeOutcome::Rejected(v.into())
                        }
                    };
                }
                SocketEvent::Error(e) => self.record_error(e),
                SocketEvent::Closed { code, .. } => return HandshakeOutcome::Closed(code),
            }
        }
    }

    async fn stream_features(&mut self, socket: &mut C::Socket) -> SessionEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                ev = socket.next_event() => ev,
            };

            match event {
                SocketEvent::Text(text) => {
                    let batch = match decode_feature_result(&text) {
                        Ok(batch) => batch,
                        Err(v) => return SessionEnd::Violation(v.into()),
                    };
                    for item in batch {
                        match item {
                            Ok(feature) => self.reporter.feature(feature),
                            Err(e) => warn!("websocket-connection: dropping feature: {e}"),
                        }
                    }
                }
                SocketEvent::Error(e) => self.record_error(e),
                SocketEvent::Closed { code, .. } => return SessionEnd::Closed(code),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::{ConnectionManager, ConnectionState, ConnectionStatus, StreamEvent};
    use crate::config::ConnectionConfig;
    use crate::protocol::{Feature, encode_feature_result};
    use crate::testing::ScriptedConnector;

    fn config(max_attempts: u32) -> ConnectionConfig {
        ConnectionConfig::new("ws://feeds.test:8000", 102100).with_reconnection(max_attempts, 10.0)
    }

    fn accept_reply(config: &ConnectionConfig) -> String {
        config.handshake_request().echo_reply().to_string()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn assert_near(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_reconnection_attempts() {
        let connector = ScriptedConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(config(2), connector.clone(), tx);
        handle.closed().await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 3);
        assert_near(attempts[1] - attempts[0], 1000);
        assert_near(attempts[2] - attempts[1], 1500);

        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(handle.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn wkid_mismatch_destroys_without_connecting() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(json!({"format": "json", "spatialReference": {"wkid": 4326}}).to_string());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(cfg, connector.clone(), tx);
        handle.closed().await;

        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
        assert_eq!(peer.client_closes(), 1);
        assert!(handle.last_error().unwrap().contains("expected wkid of 102100"));

        let sent = peer.sent();
        assert_eq!(sent.len(), 1);
        let request: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(
            request,
            json!({"filter": null, "format": "json", "spatialReference": {"wkid": 102100}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_format_destroys() {
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(json!({"spatialReference": {"wkid": 102100}}).to_string());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(config(0), connector.clone(), tx);
        handle.closed().await;

        assert!(handle.is_destroyed());
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_destroys() {
        let cfg = config(0).with_handshake_timeout(Duration::from_secs(2));
        let connector = ScriptedConnector::new();
        let peer = connector.accept();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();
        let mut handle = ConnectionManager::open(cfg, connector.clone(), tx);
        handle.closed().await;

        assert_near(started.elapsed(), 2000);
        assert!(handle.is_destroyed());
        assert_eq!(peer.client_closes(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_features_and_reconnects_after_abnormal_close() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();

        let first = connector.accept();
        first.send_text(accept_reply(&cfg));
        let batch = [Feature::new(1, 10.0, 20.0), Feature::new(2, 30.0, 40.0)];
        first.send_text(encode_feature_result(&batch).unwrap());
        first.close(1006);

        let second = connector.accept();
        second.send_text(accept_reply(&cfg));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(cfg, connector.clone(), tx);

        let mut events = Vec::new();
        while events.len() < 5 {
            events.push(rx.recv().await.unwrap());
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Status(ConnectionStatus::Connected),
                StreamEvent::Feature(batch[0].clone()),
                StreamEvent::Feature(batch[1].clone()),
                StreamEvent::Status(ConnectionStatus::Disconnected),
                StreamEvent::Status(ConnectionStatus::Connected),
            ]
        );
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(handle.connection_status(), ConnectionStatus::Connected);

        handle.destroy();
        handle.closed().await;
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
        assert_eq!(second.client_closes(), 1);
        assert_eq!(connector.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_message_type_tears_down_without_reconnect() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(accept_reply(&cfg));
        peer.send_text(json!({"type": "heartbeat"}).to_string());
        // Never consumed: the violation must not reconnect.
        let _spare = connector.accept();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(cfg, connector.clone(), tx);
        handle.closed().await;

        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(peer.client_closes(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                StreamEvent::Status(ConnectionStatus::Connected),
                StreamEvent::Status(ConnectionStatus::Disconnected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn schema_rejects_do_not_drop_the_batch() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(accept_reply(&cfg));
        peer.send_text(
            json!({
                "type": "featureResult",
                "features": [
                    {"attributes": {"TRACKID": 7}},
                    {"attributes": {"TRACKID": 8}, "geometry": {"x": 1.0, "y": 2.0}}
                ]
            })
            .to_string(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionManager::open(cfg, connector, tx);

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Status(ConnectionStatus::Connected))
        );
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Feature(Feature::new(8, 1.0, 2.0)))
        );
        assert_eq!(handle.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent_and_cancels_backoff() {
        let connector = ScriptedConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(config(0), connector.clone(), tx);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(connector.attempts().len(), 1);

        handle.destroy();
        handle.destroy();
        handle.closed().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
        assert_eq!(handle.connection_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_errors_are_recorded() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(accept_reply(&cfg));
        peer.send_error("connection reset");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionManager::open(cfg, connector, tx);
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Status(ConnectionStatus::Connected))
        );
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.last_error().as_deref(), Some("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_while_open_is_visible_immediately() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(accept_reply(&cfg));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ConnectionManager::open(cfg, connector.clone(), tx);
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Status(ConnectionStatus::Connected))
        );
        assert_eq!(handle.state(), ConnectionState::Open);

        handle.destroy();
        assert_eq!(handle.connection_status(), ConnectionStatus::Disconnected);
        assert_eq!(handle.state(), ConnectionState::Closed);

        handle.destroy();
        handle.closed().await;
        handle.destroy();

        assert_eq!(peer.client_closes(), 1);
        assert_eq!(peer.sent().len(), 1);
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Status(ConnectionStatus::Disconnected)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_handshake_reconnects() {
        let cfg = config(0);
        let connector = ScriptedConnector::new();
        let first = connector.accept();
        first.close(1011);
        let second = connector.accept();
        second.send_text(accept_reply(&cfg));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionManager::open(cfg, connector.clone(), tx);

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Status(ConnectionStatus::Connected))
        );
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] < Duration::from_millis(10));
        // Both attempts sent a handshake; only the second was answered.
        assert_eq!(first.sent().len(), 1);
        assert_eq!(second.sent().len(), 1);
        assert_eq!(handle.state(), ConnectionState::Open);
        assert!(!handle.is_destroyed());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn soft_capability_mismatch_still_opens() {
        let cfg = config(0)
            .with_filter(json!({"where": "TYPE = 1"}))
            .with_out_fields(vec!["TRACKID".to_string(), "TYPE".to_string()]);
        let connector = ScriptedConnector::new();
        let peer = connector.accept();
        peer.send_text(json!({"format": "json", "spatialReference": {"wkid": 102100}}).to_string());
        peer.send_text(encode_feature_result(&[Feature::new(3, 5.0, 6.0)]).unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionManager::open(cfg, connector, tx);

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Status(ConnectionStatus::Connected))
        );
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Feature(Feature::new(3, 5.0, 6.0)))
        );
        assert_eq!(handle.state(), ConnectionState::Open);
        assert_eq!(handle.last_error(), None);

        let request: Value = serde_json::from_str(&peer.sent()[0]).unwrap();
        assert_eq!(request["outFields"], json!(["TRACKID", "TYPE"]));
        assert_eq!(request["filter"], json!({"where": "TYPE = 1"}));
    }
}
