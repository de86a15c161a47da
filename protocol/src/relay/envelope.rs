//! Wire envelopes.
//!
//! Inbound frames are parsed in two steps. First into a loose
//! [`RawEnvelope`] that accepts any shape with an `action`, so even a
//! broken request can be answered with an error that names the action it
//! tried. Then into a typed [`Request`] that enforces the per-action
//! required fields.
//!
//! Transaction details stay as raw JSON text end to end. They are never
//! re-serialized, which is what keeps them byte-identical between the
//! merchant and the client.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::ledger::SignedPayload;
use crate::session::{SessionId, TransactionDetails};

use super::error::RelayError;

/// Label used in error envelopes when a frame has no readable action.
pub const UNKNOWN_ACTION: &str = "unknown";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Actions a connection may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateSession,
    JoinSession,
    RequestTransactionDetails,
    SubmitTransaction,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::CreateSession => "createSession",
            Action::JoinSession => "joinSession",
            Action::RequestTransactionDetails => "requestTransactionDetails",
            Action::SubmitTransaction => "submitTransaction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "createSession" => Some(Action::CreateSession),
            "joinSession" => Some(Action::JoinSession),
            "requestTransactionDetails" => Some(Action::RequestTransactionDetails),
            "submitTransaction" => Some(Action::SubmitTransaction),
            _ => None,
        }
    }
}

/// Loosely parsed inbound frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelope {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transaction_details: Option<Box<RawValue>>,
    #[serde(default)]
    pub transaction: Option<Box<RawValue>>,
}

/// A validated request.
#[derive(Debug)]
pub enum Request {
    CreateSession {
        details: TransactionDetails,
    },
    JoinSession {
        session_id: SessionId,
    },
    RequestTransactionDetails {
        session_id: SessionId,
    },
    SubmitTransaction {
        session_id: SessionId,
        payload: SignedPayload,
    },
}

impl RawEnvelope {
    /// Parse a text frame. Fails only if it is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("malformed envelope: {e}")))
    }

    /// Action name to echo back in an error envelope.
    pub fn action_label(&self) -> &str {
        self.action.as_deref().unwrap_or(UNKNOWN_ACTION)
    }

    /// Enforce the fields each action requires.
    pub fn into_request(self) -> Result<Request, RelayError> {
        let name = self
            .action
            .as_deref()
            .ok_or_else(|| RelayError::Protocol("missing action".into()))?;
        let action = Action::parse(name)
            .ok_or_else(|| RelayError::Protocol(format!("unknown action {name:?}")))?;

        match action {
            Action::CreateSession => {
                let raw = self
                    .transaction_details
                    .ok_or_else(|| RelayError::Protocol("missing transactionDetails".into()))?;
                Ok(Request::CreateSession {
                    details: TransactionDetails::from_raw(raw)?,
                })
            }
            Action::JoinSession => Ok(Request::JoinSession {
                session_id: require_session_id(self.session_id)?,
            }),
            Action::RequestTransactionDetails => Ok(Request::RequestTransactionDetails {
                session_id: require_session_id(self.session_id)?,
            }),
            Action::SubmitTransaction => {
                let session_id = require_session_id(self.session_id)?;
                let raw = self
                    .transaction
                    .ok_or_else(|| RelayError::Protocol("missing transaction".into()))?;
                let payload: SignedPayload = serde_json::from_str(raw.get())
                    .map_err(|e| RelayError::Protocol(format!("malformed transaction: {e}")))?;
                Ok(Request::SubmitTransaction {
                    session_id,
                    payload,
                })
            }
        }
    }
}

fn require_session_id(id: Option<String>) -> Result<SessionId, RelayError> {
    match id {
        Some(id) if !id.trim().is_empty() => Ok(SessionId::from(id)),
        _ => Err(RelayError::Protocol("missing sessionId".into())),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Messages the relay sends.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    SessionCreated {
        session_id: SessionId,
    },
    JoinedSession {
        session_id: SessionId,
    },
    TransactionDetails {
        session_id: SessionId,
        details: TransactionDetails,
    },
    TransactionSubmitted {
        session_id: SessionId,
    },
    TransactionConfirmed {
        session_id: SessionId,
        signature: String,
        explorer_url: String,
    },
    Error {
        action: String,
        code: &'static str,
        message: String,
        session_id: Option<SessionId>,
    },
}

/// Flat wire shape shared by every outbound message.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope<'a> {
    status: &'static str,
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explorer_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl<'a> WireEnvelope<'a> {
    fn success(action: &'a str, session_id: &'a SessionId) -> Self {
        WireEnvelope {
            status: "success",
            action,
            session_id: Some(session_id),
            details: None,
            signature: None,
            explorer_url: None,
            error: None,
            message: None,
        }
    }
}

impl ServerMessage {
    /// Build an error envelope.
    pub fn error(action: impl Into<String>, err: &RelayError) -> Self {
        ServerMessage::Error {
            action: action.into(),
            code: err.code(),
            message: err.to_string(),
            session_id: None,
        }
    }

    /// The `action` field this message carries on the wire.
    pub fn action(&self) -> &str {
        match self {
            ServerMessage::SessionCreated { .. } => "sessionCreated",
            ServerMessage::JoinedSession { .. } => "joinedSession",
            ServerMessage::TransactionDetails { .. } => "transactionDetails",
            ServerMessage::TransactionSubmitted { .. } => "transactionSubmitted",
            ServerMessage::TransactionConfirmed { .. } => "transactionConfirmed",
            ServerMessage::Error { action, .. } => action,
        }
    }

    /// Render as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let action = self.action();
        let wire = match self {
            ServerMessage::SessionCreated { session_id }
            | ServerMessage::JoinedSession { session_id }
            | ServerMessage::TransactionSubmitted { session_id } => {
                WireEnvelope::success(action, session_id)
            }
            ServerMessage::TransactionDetails {
                session_id,
                details,
            } => WireEnvelope {
                details: Some(details.raw()),
                ..WireEnvelope::success(action, session_id)
            },
            ServerMessage::TransactionConfirmed {
                session_id,
                signature,
                explorer_url,
            } => WireEnvelope {
                signature: Some(signature.as_str()),
                explorer_url: Some(explorer_url.as_str()),
                ..WireEnvelope::success(action, session_id)
            },
            ServerMessage::Error {
                code,
                message,
                session_id,
                ..
            } => WireEnvelope {
                status: "error",
                action,
                session_id: session_id.as_ref(),
                details: None,
                signature: None,
                explorer_url: None,
                error: Some(*code),
                message: Some(message.as_str()),
            },
        };
        serde_json::to_string(&wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const DETAILS: &str = r#"{"amount":1000000,"merchantId":"7","stateAccount":"5Hzk"}"#;

    fn json(msg: &ServerMessage) -> Value {
        serde_json::from_str(&msg.to_json().unwrap()).unwrap()
    }

    #[test]
    fn parses_create_session() {
        let frame = format!(r#"{{"action":"createSession","transactionDetails":{DETAILS}}}"#);
        let request = RawEnvelope::parse(&frame).unwrap().into_request().unwrap();
        match request {
            Request::CreateSession { details } => {
                assert_eq!(details.as_bytes(), DETAILS.as_bytes())
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_submit_transaction() {
        let frame = r#"{"action":"submitTransaction","sessionId":"s1",
            "transaction":{"message":"m","signature":"s","clientPublicKey":"k"}}"#;
        match RawEnvelope::parse(frame).unwrap().into_request().unwrap() {
            Request::SubmitTransaction {
                session_id,
                payload,
            } => {
                assert_eq!(session_id.as_str(), "s1");
                assert_eq!(payload.client_public_key, "k");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        for frame in [
            "not json",
            "[1,2]",
            r#"{"action":"joinSession"}"#,
            r#"{"action":"joinSession","sessionId":""}"#,
            r#"{"action":"createSession"}"#,
            r#"{"action":"createSession","transactionDetails":{"amount":0,"merchantId":"7"}}"#,
            r#"{"action":"submitTransaction","sessionId":"s1"}"#,
            r#"{"action":"submitTransaction","sessionId":"s1","transaction":{"message":"m"}}"#,
            r#"{"action":"dance"}"#,
            r#"{"sessionId":"s1"}"#,
        ] {
            let result = RawEnvelope::parse(frame).and_then(RawEnvelope::into_request);
            let err = result.expect_err(frame);
            assert_eq!(err.code(), "protocolError", "{frame}");
        }
    }

    #[test]
    fn action_label_survives_bad_requests() {
        let raw = RawEnvelope::parse(r#"{"action":"joinSession"}"#).unwrap();
        assert_eq!(raw.action_label(), "joinSession");
        let raw = RawEnvelope::parse(r#"{"sessionId":"x"}"#).unwrap();
        assert_eq!(raw.action_label(), UNKNOWN_ACTION);
    }

    #[test]
    fn success_envelopes() {
        let id = SessionId::from("s1");
        let v = json(&ServerMessage::SessionCreated {
            session_id: id.clone(),
        });
        assert_eq!(v["status"], "success");
        assert_eq!(v["action"], "sessionCreated");
        assert_eq!(v["sessionId"], "s1");

        let v = json(&ServerMessage::TransactionConfirmed {
            session_id: id,
            signature: "sig".into(),
            explorer_url: "https://solscan.io/tx/sig".into(),
        });
        assert_eq!(v["action"], "transactionConfirmed");
        assert_eq!(v["explorerUrl"], "https://solscan.io/tx/sig");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn details_are_embedded_verbatim() {
        let spaced = r#"{ "merchantId" : "7", "amount" : 1000000 }"#;
        let msg = ServerMessage::TransactionDetails {
            session_id: SessionId::from("s1"),
            details: TransactionDetails::from_json(spaced).unwrap(),
        };
        let text = msg.to_json().unwrap();
        assert!(text.contains(spaced), "{text}");
    }

    #[test]
    fn error_envelope_shape() {
        let err = RelayError::Protocol("missing sessionId".into());
        let v = json(&ServerMessage::error("joinSession", &err));
        assert_eq!(v["status"], "error");
        assert_eq!(v["action"], "joinSession");
        assert_eq!(v["error"], "protocolError");
        assert!(v["message"].as_str().unwrap().contains("missing sessionId"));
        assert!(v.get("sessionId").is_none());
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            Action::CreateSession,
            Action::JoinSession,
            Action::RequestTransactionDetails,
            Action::SubmitTransaction,
        ] {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
    }
}
