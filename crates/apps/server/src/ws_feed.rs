//! WebSocket feed session.
//!
//! The first text message from a client is the stream handshake. The server
//! answers with its own capabilities and then forwards every broadcast
//! `featureResult` frame until either side goes away.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use streaming::HandshakeRequest;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared by every session.
pub struct FeedState {
    pub frames: broadcast::Sender<Arc<str>>,
    /// Spatial reference the simulated geometry is expressed in.
    pub wkid: i64,
}

/// Build the reply to a client handshake.
///
/// The reply always states the server's own wkid; a client asking for a
/// different one will see the mismatch and give up.
pub fn handshake_reply(text: &str, server_wkid: i64) -> Result<Value, String> {
    let mut request: HandshakeRequest =
        serde_json::from_str(text).map_err(|e| format!("bad handshake: {e}"))?;
    request.spatial_reference.wkid = server_wkid;
    Ok(request.echo_reply())
}

pub async fn handle_feed_socket(socket: WebSocket, state: Arc<FeedState>) {
    let session_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let request = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                warn!("feed session {session_id}: binary handshake");
                let _ = ws_tx.send(close(close_code::PROTOCOL, "expected text")).await;
                return;
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                warn!("feed session {session_id}: receive error before handshake: {e}");
                return;
            }
        }
    };

    let reply = match handshake_reply(&request, state.wkid) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("feed session {session_id}: {e}");
            let _ = ws_tx.send(close(close_code::PROTOCOL, "bad handshake")).await;
            return;
        }
    };
    if let Err(e) = ws_tx.send(Message::Text(reply.to_string())).await {
        warn!("feed session {session_id}: failed to send handshake reply: {e}");
        return;
    }

    info!("feed session {session_id} connected");

    let mut frames = state.frames.subscribe();
    let sender_id = session_id.clone();
    let sender_task = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    if let Err(e) = ws_tx.send(Message::Text(frame.to_string())).await {
                        debug!("feed session {sender_id}: send failed: {e}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("feed session {sender_id}: slow client, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = ws_tx.send(close(close_code::AWAY, "feed stopped")).await;
                    break;
                }
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("feed session {session_id}: receive error: {e}");
                break;
            }
        }
    }

    sender_task.abort();
    info!("feed session {session_id} disconnected");
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}
