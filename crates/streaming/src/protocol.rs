//! Wire format for the live feature stream.
//!
//! The protocol runs over WebSocket text frames carrying JSON:
//! - Handshake request (client → server), sent once after the socket opens
//! - Handshake reply (server → client), exactly one, validated before streaming
//! - Feature results (server → client), the steady-state message
//!
//! Everything here is stateless: parse/build plus validation. Connection
//! lifecycle lives in [`crate::connection`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Feature id key inside `attributes`.
pub const ATTR_TRACK_ID: &str = "TRACKID";
/// Heading in radians.
pub const ATTR_HEADING: &str = "HEADING";
/// Index into the sprite atlas.
pub const ATTR_TYPE: &str = "TYPE";
/// Optional 0/1 flag.
pub const ATTR_ACTIVE: &str = "ACTIVE";

/// The only payload format the client speaks.
pub const FORMAT_JSON: &str = "json";
/// `type` tag of steady-state messages.
pub const FEATURE_RESULT: &str = "featureResult";

/// Close code of a normal, expected WebSocket close.
pub const CLOSE_NORMAL: u16 = 1000;

pub type TrackId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialReference {
    pub wkid: i64,
}

impl SpatialReference {
    pub fn new(wkid: i64) -> Self {
        Self { wkid }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One streamed entity observation, validated against the fixed attribute schema.
///
/// Unrecognised attributes are carried in `extra` untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub track_id: TrackId,
    pub geometry: Point,
    /// Radians.
    pub heading: f64,
    pub feature_type: u32,
    pub active: Option<u8>,
    pub centroid: Option<Point>,
    pub display_id: Option<i64>,
    pub extra: Map<String, Value>,
}

impl Feature {
    pub fn new(track_id: TrackId, x: f64, y: f64) -> Self {
        Self {
            track_id,
            geometry: Point::new(x, y),
            heading: 0.0,
            feature_type: 0,
            active: None,
            centroid: None,
            display_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    pub fn with_type(mut self, feature_type: u32) -> Self {
        self.feature_type = feature_type;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active as u8);
        self
    }

    /// Rebuild the loosely-typed attribute map (schema fields plus sidecar).
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attrs = self.extra.clone();
        attrs.insert(ATTR_TRACK_ID.to_string(), Value::from(self.track_id));
        attrs.insert(ATTR_HEADING.to_string(), Value::from(self.heading));
        attrs.insert(ATTR_TYPE.to_string(), Value::from(self.feature_type));
        if let Some(active) = self.active {
            attrs.insert(ATTR_ACTIVE.to_string(), Value::from(active));
        }
        attrs
    }

    pub fn to_wire(&self) -> WireFeature {
        WireFeature {
            geometry: Some(self.geometry),
            attributes: self.attributes(),
            centroid: self.centroid,
            display_id: self.display_id,
        }
    }
}

/// Feature exactly as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFeature {
    #[serde(default)]
    pub geometry: Option<Point>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureSchemaError {
    #[error("feature has no point geometry")]
    MissingGeometry,
    #[error("attribute TRACKID missing")]
    MissingTrackId,
    #[error("attribute {name} has invalid value {value}")]
    InvalidAttribute { name: &'static str, value: Value },
    #[error("feature is not an object: {0}")]
    Malformed(String),
}

impl TryFrom<WireFeature> for Feature {
    type Error = FeatureSchemaError;

    fn try_from(wire: WireFeature) -> Result<Self, Self::Error> {
        let geometry = wire.geometry.ok_or(FeatureSchemaError::MissingGeometry)?;
        let mut extra = wire.attributes;

        let track_id = match extra.remove(ATTR_TRACK_ID) {
            None | Some(Value::Null) => return Err(FeatureSchemaError::MissingTrackId),
            Some(v) => integer_attr(ATTR_TRACK_ID, v)?,
        };

        let heading = match extra.remove(ATTR_HEADING) {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(value) => {
                return Err(FeatureSchemaError::InvalidAttribute {
                    name: ATTR_HEADING,
                    value,
                });
            }
        };

        let feature_type = match extra.remove(ATTR_TYPE) {
            None | Some(Value::Null) => 0,
            Some(v) => {
                let t = integer_attr(ATTR_TYPE, v.clone())?;
                u32::try_from(t).map_err(|_| FeatureSchemaError::InvalidAttribute {
                    name: ATTR_TYPE,
                    value: v,
                })?
            }
        };

        let active = match extra.remove(ATTR_ACTIVE) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(b as u8),
            Some(v) => {
                let a = integer_attr(ATTR_ACTIVE, v.clone())?;
                Some(u8::try_from(a).map_err(|_| FeatureSchemaError::InvalidAttribute {
                    name: ATTR_ACTIVE,
                    value: v,
                })?)
            }
        };

        Ok(Feature {
            track_id,
            geometry,
            heading,
            feature_type,
            active,
            centroid: wire.centroid,
            display_id: wire.display_id,
            extra,
        })
    }
}

/// Integers may arrive as JSON floats (`12.0`); accept those when they are integral.
fn as_integral(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(f as i64),
        _ => None,
    }
}

fn integer_attr(name: &'static str, value: Value) -> Result<i64, FeatureSchemaError> {
    as_integral(&value).ok_or(FeatureSchemaError::InvalidAttribute { name, value })
}

/// Client → server handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    #[serde(default)]
    pub filter: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_fields: Option<Vec<String>>,
    pub format: String,
    pub spatial_reference: SpatialReference,
}

impl HandshakeRequest {
    pub fn new(wkid: i64) -> Self {
        Self {
            filter: Value::Null,
            out_fields: None,
            format: FORMAT_JSON.to_string(),
            spatial_reference: SpatialReference::new(wkid),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The reply a fully capable server sends back.
    pub fn echo_reply(&self) -> Value {
        let mut reply = Map::new();
        reply.insert("filter".to_string(), self.filter.clone());
        if let Some(fields) = &self.out_fields {
            reply.insert("outFields".to_string(), Value::from(fields.clone()));
        }
        reply.insert("format".to_string(), Value::from(FORMAT_JSON));
        reply.insert(
            "spatialReference".to_string(),
            serde_json::json!({ "wkid": self.spatial_reference.wkid }),
        );
        Value::Object(reply)
    }
}

/// Fatal protocol errors. Any of these tears the current connection down.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("handshake failed - expected wkid of {expected}, got {actual:?}")]
    WkidMismatch { expected: i64, actual: Option<i64> },
    #[error("handshake failed - format is {actual:?}, expected \"json\"")]
    FormatMismatch { actual: Option<String> },
    #[error("expected message of type 'featureResult', got {actual:?}")]
    UnexpectedMessageType { actual: Option<String> },
    #[error("feature result has no features array")]
    MissingFeatures,
}

/// Non-fatal handshake findings: the server may silently not support these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityMismatch {
    Filter,
    OutFields,
}

impl std::fmt::Display for CapabilityMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityMismatch::Filter => write!(f, "tried to set filter, but server doesn't support it"),
            CapabilityMismatch::OutFields => {
                write!(f, "tried to set outFields, but server doesn't support it")
            }
        }
    }
}

/// Validate the single handshake reply against the request that was sent.
///
/// Checks run in order: JSON object, wkid, format. Filter/outFields
/// differences are returned as soft mismatches.
pub fn validate_handshake_reply(
    text: &str,
    request: &HandshakeRequest,
) -> Result<Vec<CapabilityMismatch>, ProtocolViolation> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
    let Value::Object(reply) = value else {
        return Err(ProtocolViolation::NotAnObject);
    };

    let expected = request.spatial_reference.wkid;
    let actual = reply
        .get("spatialReference")
        .and_then(|sr| sr.get("wkid"))
        .and_then(as_integral);
    if actual != Some(expected) {
        return Err(ProtocolViolation::WkidMismatch { expected, actual });
    }

    let format = reply.get("format").and_then(Value::as_str);
    if format != Some(FORMAT_JSON) {
        return Err(ProtocolViolation::FormatMismatch {
            actual: format.map(str::to_string),
        });
    }

    let mut mismatches = Vec::new();
    if !request.filter.is_null() && reply.get("filter") != Some(&request.filter) {
        mismatches.push(CapabilityMismatch::Filter);
    }
    if let Some(fields) = &request.out_fields {
        let echoed: Option<Vec<&str>> = reply
            .get("outFields")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect());
        let requested: Vec<&str> = fields.iter().map(String::as_str).collect();
        if echoed.as_deref() != Some(requested.as_slice()) {
            mismatches.push(CapabilityMismatch::OutFields);
        }
    }
    Ok(mismatches)
}

/// Decode one steady-state frame.
///
/// Frame-level problems are protocol violations. Per-feature schema failures
/// are returned in place so the caller can log them and keep the rest.
pub fn decode_feature_result(
    text: &str,
) -> Result<Vec<Result<Feature, FeatureSchemaError>>, ProtocolViolation> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
    let Value::Object(mut msg) = value else {
        return Err(ProtocolViolation::NotAnObject);
    };

    let msg_type = msg.get("type").and_then(Value::as_str);
    if msg_type != Some(FEATURE_RESULT) {
        return Err(ProtocolViolation::UnexpectedMessageType {
            actual: msg_type.map(str::to_string),
        });
    }

    let Some(Value::Array(features)) = msg.remove("features") else {
        return Err(ProtocolViolation::MissingFeatures);
    };

    Ok(features
        .into_iter()
        .map(|f| {
            serde_json::from_value::<WireFeature>(f)
                .map_err(|e| FeatureSchemaError::Malformed(e.to_string()))
                .and_then(Feature::try_from)
        })
        .collect())
}

/// Build a steady-state frame (server side).
pub fn encode_feature_result(features: &[Feature]) -> Result<String, serde_json::Error> {
    let wire: Vec<WireFeature> = features.iter().map(Feature::to_wire).collect();
    serde_json::to_string(&serde_json::json!({
        "type": FEATURE_RESULT,
        "features": wire,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn handshake_request_shape() {
        let mut req = HandshakeRequest::new(102100);
        let encoded: Value = serde_json::from_str(&req.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({"filter": null, "format": "json", "spatialReference": {"wkid": 102100}})
        );

        req.out_fields = Some(vec!["TRACKID".into(), "HEADING".into()]);
        let encoded: Value = serde_json::from_str(&req.encode().unwrap()).unwrap();
        assert_eq!(encoded["outFields"], json!(["TRACKID", "HEADING"]));
    }

    #[test]
    fn echoed_reply_validates_cleanly() {
        let mut req = HandshakeRequest::new(4326);
        req.filter = json!({"where": "TYPE = 2"});
        req.out_fields = Some(vec!["*".into()]);
        let reply = req.echo_reply().to_string();
        assert_eq!(validate_handshake_reply(&reply, &req), Ok(vec![]));
    }

    #[test]
    fn handshake_checks_run_in_order() {
        let req = HandshakeRequest::new(102100);

        assert!(matches!(
            validate_handshake_reply("not json", &req),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert_eq!(
            validate_handshake_reply("[1,2]", &req),
            Err(ProtocolViolation::NotAnObject)
        );
        // Wrong wkid is reported even though the format is also wrong.
        assert_eq!(
            validate_handshake_reply(r#"{"spatialReference":{"wkid":4326},"format":"pbf"}"#, &req),
            Err(ProtocolViolation::WkidMismatch {
                expected: 102100,
                actual: Some(4326)
            })
        );
        assert_eq!(
            validate_handshake_reply(r#"{"spatialReference":{"wkid":102100}}"#, &req),
            Err(ProtocolViolation::FormatMismatch { actual: None })
        );
    }

    #[test]
    fn integral_float_wkid_is_accepted() {
        let req = HandshakeRequest::new(102100);
        assert_eq!(
            validate_handshake_reply(
                r#"{"spatialReference":{"wkid":102100.0},"format":"json"}"#,
                &req
            ),
            Ok(Vec::new())
        );
        assert_eq!(
            validate_handshake_reply(
                r#"{"spatialReference":{"wkid":102100.5},"format":"json"}"#,
                &req
            ),
            Err(ProtocolViolation::WkidMismatch {
                expected: 102100,
                actual: None
            })
        );
    }

    #[test]
    fn unsupported_filter_and_out_fields_are_soft() {
        let mut req = HandshakeRequest::new(102100);
        req.filter = json!("TYPE = 1");
        req.out_fields = Some(vec!["TRACKID".into()]);
        let reply = r#"{"spatialReference":{"wkid":102100},"format":"json","filter":null}"#;
        assert_eq!(
            validate_handshake_reply(reply, &req),
            Ok(vec![CapabilityMismatch::Filter, CapabilityMismatch::OutFields])
        );
    }

    #[test]
    fn decodes_feature_result_with_schema() {
        let text = json!({
            "type": "featureResult",
            "features": [
                {
                    "geometry": {"x": 10.5, "y": -3.0},
                    "attributes": {"TRACKID": 7, "HEADING": 1.5, "TYPE": 2, "ACTIVE": 1, "SPEED": 30},
                    "displayId": 99
                },
                { "geometry": {"x": 0.0, "y": 0.0}, "attributes": {"TRACKID": 8.0} }
            ]
        })
        .to_string();

        let decoded = decode_feature_result(&text).unwrap();
        assert_eq!(decoded.len(), 2);

        let first = decoded[0].as_ref().unwrap();
        assert_eq!(first.track_id, 7);
        assert_eq!(first.geometry, Point::new(10.5, -3.0));
        assert_eq!(first.heading, 1.5);
        assert_eq!(first.feature_type, 2);
        assert_eq!(first.active, Some(1));
        assert_eq!(first.display_id, Some(99));
        assert_eq!(first.extra.get("SPEED"), Some(&json!(30)));

        let second = decoded[1].as_ref().unwrap();
        assert_eq!(second.track_id, 8);
        assert_eq!(second.heading, 0.0);
        assert_eq!(second.active, None);
    }

    #[test]
    fn schema_failures_are_per_feature() {
        let text = json!({
            "type": "featureResult",
            "features": [
                { "attributes": {"TRACKID": 1} },
                { "geometry": {"x": 1.0, "y": 1.0}, "attributes": {} },
                { "geometry": {"x": 1.0, "y": 1.0}, "attributes": {"TRACKID": 3, "TYPE": -1} },
                { "geometry": {"x": 1.0, "y": 1.0}, "attributes": {"TRACKID": 4, "HEADING": "north"} },
                { "geometry": {"x": 1.0, "y": 1.0}, "attributes": {"TRACKID": 5} }
            ]
        })
        .to_string();

        let decoded = decode_feature_result(&text).unwrap();
        assert_eq!(decoded[0], Err(FeatureSchemaError::MissingGeometry));
        assert_eq!(decoded[1], Err(FeatureSchemaError::MissingTrackId));
        assert!(matches!(
            decoded[2],
            Err(FeatureSchemaError::InvalidAttribute { name: ATTR_TYPE, .. })
        ));
        assert!(matches!(
            decoded[3],
            Err(FeatureSchemaError::InvalidAttribute { name: ATTR_HEADING, .. })
        ));
        assert!(decoded[4].is_ok());
    }

    #[test]
    fn frame_level_violations() {
        assert!(matches!(
            decode_feature_result("{"),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert_eq!(
            decode_feature_result(r#"{"type":"heartbeat"}"#),
            Err(ProtocolViolation::UnexpectedMessageType {
                actual: Some("heartbeat".to_string())
            })
        );
        assert_eq!(
            decode_feature_result(r#"{"type":"featureResult"}"#),
            Err(ProtocolViolation::MissingFeatures)
        );
    }

    #[test]
    fn encoded_result_decodes_to_same_features() {
        let features = vec![
            Feature::new(1, 100.0, 200.0).with_heading(0.25).with_type(3),
            Feature::new(2, -5.0, 6.0).with_active(true),
        ];
        let text = encode_feature_result(&features).unwrap();
        let decoded: Vec<Feature> = decode_feature_result(&text)
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(decoded, features);
    }
}
