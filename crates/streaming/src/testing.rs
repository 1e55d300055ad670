//! Scripted in-memory transport for exercising the connection manager
//! without a network.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::StreamError;
use crate::transport::{CLOSE_ABNORMAL, Connector, FeatureSocket, SocketEvent};

enum Plan {
    Refuse(String),
    Accept(ScriptedSocket),
}

#[derive(Default)]
struct ConnectorState {
    plans: VecDeque<Plan>,
    attempts: Vec<Instant>,
}

/// Connector that plays back a queue of outcomes. Once the queue is empty
/// every further attempt is refused.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, reason: &str) {
        self.state
            .lock()
            .plans
            .push_back(Plan::Refuse(reason.to_string()));
    }

    /// Queue a successful connection and return the server side of it.
    pub fn accept(&self) -> ScriptedPeer {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(SocketLog::default()));
        self.state.lock().plans.push_back(Plan::Accept(ScriptedSocket {
            inbound: rx,
            log: log.clone(),
        }));
        ScriptedPeer { tx, log }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }
}

impl Connector for ScriptedConnector {
    type Socket = ScriptedSocket;

    async fn connect(&self, _url: &str) -> Result<ScriptedSocket, StreamError> {
        let mut state = self.state.lock();
        state.attempts.push(Instant::now());
        match state.plans.pop_front() {
            Some(Plan::Accept(socket)) => Ok(socket),
            Some(Plan::Refuse(reason)) => Err(StreamError::Transport(reason)),
            None => Err(StreamError::Transport("connection refused".to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct SocketLog {
    sent: Vec<String>,
    closes: usize,
}

pub struct ScriptedSocket {
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
    log: Arc<Mutex<SocketLog>>,
}

impl FeatureSocket for ScriptedSocket {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.log.lock().sent.push(text);
        Ok(())
    }

    async fn next_event(&mut self) -> SocketEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => SocketEvent::closed(CLOSE_ABNORMAL),
        }
    }

    async fn close(&mut self) {
        self.log.lock().closes += 1;
        self.inbound.close();
    }
}

/// Server end of a scripted socket. Dropping it closes the socket abnormally.
pub struct ScriptedPeer {
    tx: mpsc::UnboundedSender<SocketEvent>,
    log: Arc<Mutex<SocketLog>>,
}

impl ScriptedPeer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(SocketEvent::Text(text.into()));
    }

    pub fn send_error(&self, error: &str) {
        let _ = self.tx.send(SocketEvent::Error(error.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.tx.send(SocketEvent::closed(code));
    }

    /// Frames the client sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.log.lock().sent.clone()
    }

    /// How many times the client closed its end.
    pub fn client_closes(&self) -> usize {
        self.log.lock().closes
    }
}
