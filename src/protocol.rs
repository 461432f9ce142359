//! Push channel protocol message types
//!
//! Defines the JSON message format the backend pushes over the WebSocket
//! channel. Every frame is a flat envelope:
//!
//! ```json
//! {"type": "scan_update", "payload": {"id": 1, "status": "completed"}}
//! ```
//!
//! The receive timestamp is stamped client-side, not sent by the server.
//! The transport treats envelopes as opaque; the dispatcher decodes the
//! payload into the typed [`PushMessage`] union at its boundary, so nothing
//! deeper in the stack trusts arbitrary JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::registry::NoticeSeverity;
use crate::store::{AiInsight, Finding, FindingPatch, ProjectPatch, Scan, ScanPatch};

/// A received push frame: type tag, raw payload, client-side receipt time
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub tag: String,
    pub payload: serde_json::Value,
    #[serde(skip)]
    pub received_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    /// Parse a raw text frame, stamping the receive time.
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireEnvelope =
            serde_json::from_str(text).map_err(|e| SyncError::ParseFailure {
                message: e.to_string(),
            })?;
        Ok(Self {
            tag: wire.tag,
            payload: wire.payload,
            received_at: Utc::now(),
        })
    }
}

/// Typed push-message union, decoded from an envelope per type tag
#[derive(Debug, Clone)]
pub enum PushMessage {
    /// Full record: a scan was created
    ScanCreated(Scan),
    /// Partial delta for an existing (or not-yet-snapshotted) scan
    ScanUpdate(ScanPatch),
    ScanDeleted { id: u64 },
    /// Full record: a new finding was reported
    FindingNew(Finding),
    FindingUpdate(FindingPatch),
    FindingDeleted { id: u64 },
    ProjectUpdate(ProjectPatch),
    ProjectDeleted { id: u64 },
    /// Full record: a model produced an insight
    AiInsight(AiInsight),
    /// User-facing toast pushed by the backend
    Notification {
        severity: NoticeSeverity,
        message: String,
    },
    /// Keepalive reply
    Pong,
}

#[derive(Deserialize)]
struct DeletePayload {
    id: u64,
}

#[derive(Deserialize)]
struct NotificationPayload {
    #[serde(default = "NoticeSeverity::info")]
    severity: NoticeSeverity,
    message: String,
}

impl PushMessage {
    /// Decode an envelope's payload for its type tag.
    ///
    /// `Ok(None)` means the tag is unknown (forward compatible with
    /// server-added message types); `Err` means the payload did not match
    /// the known shape for its tag.
    pub fn decode(envelope: &Envelope) -> Result<Option<Self>> {
        let payload = envelope.payload.clone();
        let decoded = match envelope.tag.as_str() {
            "scan_created" => Self::ScanCreated(from_payload(payload)?),
            "scan_update" => Self::ScanUpdate(from_payload(payload)?),
            "scan_deleted" => {
                let del: DeletePayload = from_payload(payload)?;
                Self::ScanDeleted { id: del.id }
            }
            "finding_new" => Self::FindingNew(from_payload(payload)?),
            "finding_update" => Self::FindingUpdate(from_payload(payload)?),
            "finding_deleted" => {
                let del: DeletePayload = from_payload(payload)?;
                Self::FindingDeleted { id: del.id }
            }
            "project_update" => Self::ProjectUpdate(from_payload(payload)?),
            "project_deleted" => {
                let del: DeletePayload = from_payload(payload)?;
                Self::ProjectDeleted { id: del.id }
            }
            "ai_insight" => Self::AiInsight(from_payload(payload)?),
            "notification" => {
                let note: NotificationPayload = from_payload(payload)?;
                Self::Notification {
                    severity: note.severity,
                    message: note.message,
                }
            }
            "pong" => Self::Pong,
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| SyncError::ParseFailure {
        message: e.to_string(),
    })
}

/// Client-to-server message sent over the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive probe
    Ping,
    /// Narrow the per-scan channel to specific event kinds
    Subscribe { events: Vec<String> },
    Unsubscribe { events: Vec<String> },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        // Serialization of these shapes cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScanStatus;

    #[test]
    fn test_envelope_parse() {
        let env = Envelope::parse(r#"{"type":"scan_update","payload":{"id":1,"status":"completed"}}"#)
            .unwrap();
        assert_eq!(env.tag, "scan_update");
        assert_eq!(env.payload["id"], 1);
    }

    #[test]
    fn test_envelope_parse_rejects_garbage() {
        assert!(Envelope::parse("not json").is_err());
        assert!(Envelope::parse(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let env = Envelope::parse(r#"{"type":"pong"}"#).unwrap();
        assert!(env.payload.is_null());
        assert!(matches!(
            PushMessage::decode(&env).unwrap(),
            Some(PushMessage::Pong)
        ));
    }

    #[test]
    fn test_decode_scan_update() {
        let env = Envelope::parse(r#"{"type":"scan_update","payload":{"id":1,"status":"completed"}}"#)
            .unwrap();
        match PushMessage::decode(&env).unwrap() {
            Some(PushMessage::ScanUpdate(patch)) => {
                assert_eq!(patch.id, 1);
                assert_eq!(patch.status, Some(ScanStatus::Completed));
            }
            other => panic!("expected ScanUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag_is_none() {
        let env = Envelope::parse(r#"{"type":"added_in_v9","payload":{"x":1}}"#).unwrap();
        assert!(PushMessage::decode(&env).unwrap().is_none());
    }

    #[test]
    fn test_decode_shape_mismatch_is_error() {
        let env = Envelope::parse(r#"{"type":"scan_deleted","payload":{"not_id":5}}"#).unwrap();
        assert!(PushMessage::decode(&env).is_err());
    }

    #[test]
    fn test_client_message_round_trip() {
        let json = ClientMessage::Ping.to_json();
        assert_eq!(json, r#"{"type":"ping"}"#);
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","events":["findings"]}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { events } => assert_eq!(events, vec!["findings"]),
            _ => panic!("expected Subscribe"),
        }
    }
}
