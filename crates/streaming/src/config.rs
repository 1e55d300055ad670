use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backoff::Backoff;
use crate::error::StreamError;
use crate::protocol::{FORMAT_JSON, HandshakeRequest, SpatialReference};

/// Immutable per-connection parameters, supplied once at connection creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// WebSocket URL of the stream service.
    pub source: String,
    #[serde(default = "default_geometry_type")]
    pub geometry_type: String,
    #[serde(default)]
    pub filter: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_fields: Option<Vec<String>>,
    /// Requested output spatial reference; the server must echo this wkid.
    pub spatial_reference: SpatialReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_spatial_reference: Option<SpatialReference>,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_reconnection_attempts: u32,
    /// Seconds; caps the reconnect backoff. 0 = uncapped.
    #[serde(default = "default_max_reconnection_interval")]
    pub max_reconnection_interval: f64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_geometry_type() -> String {
    "point".to_string()
}

fn default_max_reconnection_interval() -> f64 {
    10.0
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl ConnectionConfig {
    pub fn new(source: impl Into<String>, wkid: i64) -> Self {
        Self {
            source: source.into(),
            geometry_type: default_geometry_type(),
            filter: Value::Null,
            out_fields: None,
            spatial_reference: SpatialReference::new(wkid),
            source_spatial_reference: None,
            max_reconnection_attempts: 0,
            max_reconnection_interval: default_max_reconnection_interval(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    pub fn with_reconnection(mut self, max_attempts: u32, max_interval_s: f64) -> Self {
        self.max_reconnection_attempts = max_attempts;
        self.max_reconnection_interval = max_interval_s;
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_out_fields(mut self, fields: Vec<String>) -> Self {
        self.out_fields = Some(fields);
        self
    }

    pub fn with_source_wkid(mut self, wkid: i64) -> Self {
        self.source_spatial_reference = Some(SpatialReference::new(wkid));
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, StreamError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| StreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if !(self.source.starts_with("ws://") || self.source.starts_with("wss://")) {
            return Err(StreamError::Config(format!(
                "source must be a ws:// or wss:// URL, got {:?}",
                self.source
            )));
        }
        if !self.max_reconnection_interval.is_finite() || self.max_reconnection_interval < 0.0 {
            return Err(StreamError::Config(
                "maxReconnectionInterval must be a non-negative number of seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn handshake_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            filter: self.filter.clone(),
            out_fields: self.out_fields.clone(),
            format: FORMAT_JSON.to_string(),
            spatial_reference: self.spatial_reference,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.max_reconnection_attempts,
            self.max_reconnection_interval,
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
