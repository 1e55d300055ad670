//! Feature stream client: wire protocol, reconnect policy and the
//! connection state machine.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use backoff::Backoff;
pub use config::ConnectionConfig;
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus, StreamEvent,
    StreamObserver,
};
pub use error::StreamError;
pub use protocol::{
    CapabilityMismatch, Feature, FeatureSchemaError, HandshakeRequest, Point, ProtocolViolation,
    SpatialReference, TrackId, WireFeature,
};
pub use transport::{Connector, FeatureSocket, SocketEvent, WsConnector, WsSocket};
