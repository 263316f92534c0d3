//! Wire envelopes
//!
//! Every frame is a UTF-8 JSON object carrying a `type` discriminator.
//! Inbound frames decode into [`ClientMessage`]; anything the relay emits is a
//! [`ServerMessage`]. Payload fields are camelCase on the wire.

use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ids::{RoomCode, SessionId};
use crate::metrics::MetricsSnapshot;
use crate::relay::rooms::RoomSummary;
use crate::relay::DeviceClass;

/// Field added to forwarded `sync_request` envelopes
pub const FROM_SESSION_FIELD: &str = "fromSessionId";

/// Current time as Unix epoch milliseconds
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Producer timestamp of a raw pose frame, if it has a numeric one
#[must_use]
pub fn frame_timestamp(data: &Value) -> Option<f64> {
    data.get("timestamp").and_then(Value::as_f64)
}

/// Inbound frame could not be turned into a [`ClientMessage`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message is missing a string 'type' field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

impl ProtocolError {
    pub fn invalid(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

/// Messages sent by peers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        #[serde(alias = "room")]
        room_id: String,
    },
    CreateRoom {},
    LeaveRoom {},
    /// `data` is opaque: it is relayed untouched and never validated
    PoseData {
        #[serde(default)]
        data: Value,
    },
    DeviceRegister {
        #[serde(default, alias = "deviceInfo")]
        capabilities: Value,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    GetStats {},
    RoomList {},
    SyncRequest {
        #[serde(default, rename = "targetSessionId")]
        target: Option<String>,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Decode one inbound text frame
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolError::Malformed("expected a JSON object".into()));
        }
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => return Err(ProtocolError::MissingType),
        };

        match serde_json::from_value::<Self>(value) {
            Ok(Self::Unknown) => Err(ProtocolError::UnknownType(kind)),
            Ok(message) => Ok(message),
            Err(e) => Err(ProtocolError::invalid(kind, e.to_string())),
        }
    }

    /// Wire name of the message type
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::CreateRoom {} => "create_room",
            Self::LeaveRoom {} => "leave_room",
            Self::PoseData { .. } => "pose_data",
            Self::DeviceRegister { .. } => "device_register",
            Self::Ping { .. } => "ping",
            Self::GetStats {} => "get_stats",
            Self::RoomList {} => "room_list",
            Self::SyncRequest { .. } => "sync_request",
            Self::Unknown => "unknown",
        }
    }
}

/// One motion-capture snapshot as a producer builds it.
///
/// The relay itself never decodes frames into this type; it forwards the
/// raw `data` object and only peeks at `timestamp` via [`frame_timestamp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    /// Producer clock, epoch milliseconds
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FrameMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A room member as announced to other members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub session_id: SessionId,
    pub device_type: DeviceClass,
    pub joined_at: i64,
}

/// Messages emitted by the relay
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        session_id: SessionId,
        device_type: DeviceClass,
        timestamp: i64,
    },
    RoomJoined {
        room_id: RoomCode,
        participants: Vec<Participant>,
        created_at: i64,
        timestamp: i64,
    },
    RoomCreated {
        room_id: RoomCode,
        participants: Vec<Participant>,
        created_at: i64,
        timestamp: i64,
    },
    ParticipantJoined {
        room_id: RoomCode,
        participant: Participant,
        timestamp: i64,
    },
    ParticipantLeft {
        room_id: RoomCode,
        session_id: SessionId,
        device_type: DeviceClass,
        timestamp: i64,
    },
    PairingSuccess {
        room_id: RoomCode,
        devices: Vec<DeviceClass>,
        participants: Vec<Participant>,
        timestamp: i64,
    },
    PoseData {
        session_id: SessionId,
        device_type: DeviceClass,
        data: Value,
        server_timestamp: i64,
        /// Absent when the frame carries no numeric `timestamp`
        #[serde(skip_serializing_if = "Option::is_none")]
        latency: Option<f64>,
    },
    Pong {
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_timestamp: Option<f64>,
    },
    DeviceRegistered {
        session_id: SessionId,
        capabilities: Value,
        timestamp: i64,
    },
    Stats {
        #[serde(flatten)]
        metrics: MetricsSnapshot,
        active_sessions: usize,
        active_rooms: usize,
        timestamp: i64,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
        timestamp: i64,
    },
    SyncRequest {
        from_session_id: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_session_id: Option<String>,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    Error {
        message: String,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    /// Stamp a frame with the relay's receive time and producer-to-relay latency
    pub fn pose(session_id: SessionId, device_type: DeviceClass, data: Value) -> Self {
        let server_timestamp = now_millis();
        let latency = frame_timestamp(&data).map(|sent| server_timestamp as f64 - sent);
        Self::PoseData {
            session_id,
            device_type,
            data,
            server_timestamp,
            latency,
        }
    }

    /// Wrap a peer's `sync_request` for delivery, tagged with the sender.
    ///
    /// A client-supplied `fromSessionId` is discarded so it cannot be spoofed.
    pub fn forwarded_sync(
        from: SessionId,
        target: Option<String>,
        mut payload: Map<String, Value>,
    ) -> Self {
        payload.remove(FROM_SESSION_FIELD);
        Self::SyncRequest {
            from_session_id: from,
            target_session_id: target,
            payload,
        }
    }

    /// Serialize once; the result is cheap to clone per recipient
    pub fn encode(&self) -> serde_json::Result<Utf8Bytes> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }

    /// Wire name of the message type
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::RoomJoined { .. } => "room_joined",
            Self::RoomCreated { .. } => "room_created",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::PairingSuccess { .. } => "pairing_success",
            Self::PoseData { .. } => "pose_data",
            Self::Pong { .. } => "pong",
            Self::DeviceRegistered { .. } => "device_registered",
            Self::Stats { .. } => "stats",
            Self::RoomList { .. } => "room_list",
            Self::SyncRequest { .. } => "sync_request",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join_room() {
        let msg = ClientMessage::decode(r#"{"type":"join_room","roomId":"AB12CD"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: "AB12CD".into()
            }
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields_on_control_messages() {
        let msg = ClientMessage::decode(r#"{"type":"create_room","hint":"x"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CreateRoom {});
    }

    #[test]
    fn test_decode_non_json_is_malformed() {
        let err = ClientMessage::decode("not json {").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_non_object_is_malformed() {
        let err = ClientMessage::decode("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_missing_type() {
        assert_eq!(
            ClientMessage::decode(r#"{"roomId":"X"}"#).unwrap_err(),
            ProtocolError::MissingType
        );
        assert_eq!(
            ClientMessage::decode(r#"{"type":42}"#).unwrap_err(),
            ProtocolError::MissingType
        );
    }

    #[test]
    fn test_decode_unknown_type_names_it() {
        let err = ClientMessage::decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("teleport".into()));
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_decode_invalid_payload() {
        let err = ClientMessage::decode(r#"{"type":"join_room"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref kind, .. } if kind == "join_room"));
    }

    #[test]
    fn test_pose_data_is_carried_untouched() {
        let raw = json!({
            "type": "pose_data",
            "data": {
                "landmarks": [{"id": 0, "x": 0.5, "y": 0.25, "name": "nose"}],
                "timestamp": "not-a-number",
                "worldLandmarks": []
            }
        });
        let msg = ClientMessage::decode(&raw.to_string()).unwrap();
        let ClientMessage::PoseData { data } = msg else {
            panic!("expected pose_data");
        };
        assert_eq!(data, raw["data"]);
        assert_eq!(frame_timestamp(&data), None);
    }

    #[test]
    fn test_pose_data_without_data_decodes() {
        let msg = ClientMessage::decode(r#"{"type":"pose_data"}"#).unwrap();
        assert_eq!(msg, ClientMessage::PoseData { data: Value::Null });
    }

    #[test]
    fn test_pose_frame_serializes_extras_flat() {
        let mut extra = Map::new();
        extra.insert("worldLandmarks".into(), json!([]));
        let frame = PoseFrame {
            landmarks: vec![Landmark {
                id: Some(json!(0)),
                x: 0.5,
                y: 0.25,
                z: -0.1,
                visibility: Some(0.9),
                extra: Map::new(),
            }],
            timestamp: 1_700_000_000_000.0,
            metadata: None,
            extra,
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["landmarks"][0]["visibility"], 0.9);
        assert!(value.get("metadata").is_none());
        assert_eq!(value["worldLandmarks"], json!([]));
        assert_eq!(frame_timestamp(&value), Some(1_700_000_000_000.0));
    }

    #[test]
    fn test_sync_request_keeps_arbitrary_fields() {
        let msg = ClientMessage::decode(
            r#"{"type":"sync_request","targetSessionId":"vr-1","calibration":{"scale":2}}"#,
        )
        .unwrap();
        let ClientMessage::SyncRequest { target, payload } = msg else {
            panic!("expected sync_request");
        };
        assert_eq!(target.as_deref(), Some("vr-1"));
        assert_eq!(payload["calibration"]["scale"], 2);
        assert!(!payload.contains_key("type"));
    }

    #[test]
    fn test_forwarded_sync_strips_spoofed_sender() {
        let mut payload = Map::new();
        payload.insert(FROM_SESSION_FIELD.into(), json!("someone-else"));
        payload.insert("seq".into(), json!(7));

        let from = SessionId::from_requested("phone").unwrap();
        let value = serde_json::to_value(ServerMessage::forwarded_sync(
            from,
            Some("vr".into()),
            payload,
        ))
        .unwrap();

        assert_eq!(value["type"], "sync_request");
        assert_eq!(value["fromSessionId"], "phone");
        assert_eq!(value["targetSessionId"], "vr");
        assert_eq!(value["seq"], 7);
    }

    #[test]
    fn test_server_message_wire_shape() {
        let value = serde_json::to_value(ServerMessage::Connected {
            session_id: SessionId::from_requested("abc").unwrap(),
            device_type: DeviceClass::Vr,
            timestamp: 5,
        })
        .unwrap();
        assert_eq!(value, json!({"type":"connected","sessionId":"abc","deviceType":"vr","timestamp":5}));
    }

    #[test]
    fn test_pose_latency_is_server_minus_frame_time() {
        let sent = (now_millis() - 40) as f64;
        let ServerMessage::PoseData {
            latency,
            server_timestamp,
            ..
        } = ServerMessage::pose(
            SessionId::generate(),
            DeviceClass::Mobile,
            json!({"landmarks": [], "timestamp": sent}),
        )
        else {
            panic!("expected pose_data");
        };
        let latency = latency.unwrap();
        assert_eq!(latency, server_timestamp as f64 - sent);
        assert!(latency >= 40.0);
    }

    #[test]
    fn test_pose_without_timestamp_has_no_latency() {
        let value = serde_json::to_value(ServerMessage::pose(
            SessionId::generate(),
            DeviceClass::Vr,
            json!({"landmarks": [{"x": 1}]}),
        ))
        .unwrap();
        assert!(value.get("latency").is_none());
        assert_eq!(value["data"]["landmarks"][0]["x"], 1);
    }

    #[test]
    fn test_error_envelope() {
        let value = serde_json::to_value(ServerMessage::error("nope")).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "nope");
        assert!(value["timestamp"].is_i64());
    }
}
