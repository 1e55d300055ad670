//! Socket seam for the connection manager.
//!
//! The manager only needs "open a socket", "send a text frame", "next event"
//! and "close". [`WsConnector`] implements that over `tokio-tungstenite`;
//! tests script it with [`crate::testing`].

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::StreamError;

/// Close code used when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Inbound socket event.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Text(String),
    /// Transient error; the close that follows drives reconnection.
    Error(String),
    Closed { code: u16, reason: String },
}

impl SocketEvent {
    pub fn closed(code: u16) -> Self {
        SocketEvent::Closed {
            code,
            reason: String::new(),
        }
    }
}

pub trait FeatureSocket: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Next inbound event. Must be cancellation safe. Once a `Closed` event
    /// has been returned the socket is finished.
    fn next_event(&mut self) -> impl Future<Output = SocketEvent> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub trait Connector: Send + Sync + 'static {
    type Socket: FeatureSocket;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Socket, StreamError>> + Send;
}

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Plain WebSocket connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Socket = WsSocket;

    async fn connect(&self, url: &str) -> Result<WsSocket, StreamError> {
        let (stream, _response) = connect_async(url).await?;
        Ok(WsSocket { stream })
    }
}

pub struct WsSocket {
    stream: WsStream,
}

impl FeatureSocket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        Ok(self.stream.send(Message::Text(text)).await?)
    }

    async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Text(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return SocketEvent::Text(text),
                    Err(_) => debug!("ignoring non-utf8 binary frame"),
                },
                // tungstenite answers pings itself on the next read
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(f) => SocketEvent::Closed {
                            code: u16::from(f.code),
                            reason: f.reason.to_string(),
                        },
                        None => SocketEvent::closed(1005),
                    };
                }
                Some(Err(e)) => return SocketEvent::Error(e.to_string()),
                None => return SocketEvent::closed(CLOSE_ABNORMAL),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("websocket close: {e}");
        }
    }
}
