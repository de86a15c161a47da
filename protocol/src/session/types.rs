//! Session entity and the value types it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use uuid::Uuid;

use crate::ledger::SignedPayload;

use super::error::SessionError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque session identifier. A UUIDv4 when we mint it; any string when it
/// arrives from a client (unknown ids simply fail lookup).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Reference to one live connection. Minted by the connection router,
/// unique for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Which side of a session a connection is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Merchant,
    Client,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// ```text
/// Created ──join──► Joined ──submit──► Submitted ──confirm──► Finalized
///    │
///    └──timeout──► Expired
/// ```
///
/// `Expired` and `Finalized` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Joined,
    Submitted,
    Finalized,
    Expired,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Finalized)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Joined => "joined",
            SessionState::Submitted => "submitted",
            SessionState::Finalized => "finalized",
            SessionState::Expired => "expired",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Transaction Details
// ---------------------------------------------------------------------------

/// The payment intent a merchant attaches to a session.
///
/// Two representations live side by side: the exact JSON text the merchant
/// sent, which is what gets handed back to clients and what they sign, and
/// a typed view used for validation and logging. The raw text is never
/// re-serialized, so clients always see the bytes the merchant sent.
#[derive(Clone, Debug)]
pub struct TransactionDetails {
    raw: Box<RawValue>,
    view: DetailsView,
}

/// Typed view over the fields the relay cares about. Extra fields are
/// ignored here and preserved in the raw text.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsView {
    /// Amount in the smallest currency unit. 1_000_000 is 1 USDC.
    pub amount: u64,
    /// Merchant identifier (the merchant NFT id).
    pub merchant_id: String,
    #[serde(default)]
    pub merchant_usdc_account: Option<String>,
    #[serde(default)]
    pub dao_usdc_account: Option<String>,
    #[serde(default)]
    pub state_account: Option<String>,
}

impl TransactionDetails {
    /// Validate and wrap raw JSON details.
    pub fn from_raw(raw: Box<RawValue>) -> Result<Self, SessionError> {
        let view: DetailsView = serde_json::from_str(raw.get())
            .map_err(|e| SessionError::InvalidDetails(e.to_string()))?;

        if view.amount == 0 {
            return Err(SessionError::InvalidDetails(
                "amount must be greater than zero".into(),
            ));
        }
        if view.merchant_id.trim().is_empty() {
            return Err(SessionError::InvalidDetails(
                "merchantId must not be empty".into(),
            ));
        }

        Ok(Self { raw, view })
    }

    /// Parse details from a JSON string. Mostly for tests and tooling.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let raw = RawValue::from_string(json.to_string())
            .map_err(|e| SessionError::InvalidDetails(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// The exact JSON text supplied at creation.
    pub fn raw(&self) -> &RawValue {
        &self.raw
    }

    /// The exact bytes supplied at creation. This is the message a client
    /// signs.
    pub fn as_bytes(&self) -> &[u8] {
        self.raw.get().as_bytes()
    }

    pub fn view(&self) -> &DetailsView {
        &self.view
    }

    pub fn amount(&self) -> u64 {
        self.view.amount
    }

    pub fn merchant_id(&self) -> &str {
        &self.view.merchant_id
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What the submission adapter reported for a submitted session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubmissionOutcome {
    /// Broadcast and confirmed.
    #[serde(rename_all = "camelCase")]
    Confirmed {
        signature: String,
        explorer_url: String,
    },
    /// Broadcast failed or confirmation timed out.
    Failed { code: String, reason: String },
}

impl SubmissionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmissionOutcome::Confirmed { .. })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only copy of a session, handed out by the store. Holds no locks
/// and no timers.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub details: TransactionDetails,
    pub merchant: Option<ConnectionId>,
    pub client: Option<ConnectionId>,
    pub signed_payload: Option<SignedPayload>,
    pub outcome: Option<SubmissionOutcome>,
    pub created_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Role `connection` plays in this session, if any.
    pub fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        if self.client == Some(connection) {
            Some(Role::Client)
        } else if self.merchant == Some(connection) {
            Some(Role::Merchant)
        } else {
            None
        }
    }

    /// Distinct connections currently bound to this session.
    pub fn bound_connections(&self) -> Vec<ConnectionId> {
        let mut out = Vec::with_capacity(2);
        for conn in [self.merchant, self.client].into_iter().flatten() {
            if !out.contains(&conn) {
                out.push(conn);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAILS: &str = r#"{"amount":1000000,"merchantId":"7","merchantUsdcAccount":"BbbT","daoUsdcAccount":"Ct7d","stateAccount":"5Hzk"}"#;

    #[test]
    fn details_keep_exact_bytes() {
        // Odd spacing and an unknown field must survive untouched.
        let json = r#"{ "merchantId": "7",  "amount": 1000000, "note": "table 4" }"#;
        let details = TransactionDetails::from_json(json).unwrap();
        assert_eq!(details.as_bytes(), json.as_bytes());
        assert_eq!(details.amount(), 1_000_000);
        assert_eq!(details.merchant_id(), "7");
    }

    #[test]
    fn details_typed_view() {
        let details = TransactionDetails::from_json(DETAILS).unwrap();
        let view = details.view();
        assert_eq!(view.merchant_usdc_account.as_deref(), Some("BbbT"));
        assert_eq!(view.dao_usdc_account.as_deref(), Some("Ct7d"));
        assert_eq!(view.state_account.as_deref(), Some("5Hzk"));
    }

    #[test]
    fn details_rejects_bad_input() {
        for bad in [
            r#"{"merchantId":"7"}"#,
            r#"{"amount":0,"merchantId":"7"}"#,
            r#"{"amount":-5,"merchantId":"7"}"#,
            r#"{"amount":1.5,"merchantId":"7"}"#,
            r#"{"amount":10,"merchantId":"  "}"#,
            r#"[1,2,3]"#,
            r#""just a string""#,
        ] {
            assert!(
                matches!(
                    TransactionDetails::from_json(bad),
                    Err(SessionError::InvalidDetails(_))
                ),
                "expected rejection for {bad}"
            );
        }
    }

    #[test]
    fn generated_ids_are_uuids() {
        let id = SessionId::generate();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Expired.is_terminal());
        assert!(SessionState::Finalized.is_terminal());
        assert!(!SessionState::Created.is_terminal());
        assert!(!SessionState::Joined.is_terminal());
        assert!(!SessionState::Submitted.is_terminal());
    }

    #[test]
    fn outcome_serializes_camel_case() {
        let outcome = SubmissionOutcome::Confirmed {
            signature: "abc".into(),
            explorer_url: "https://solscan.io/tx/abc".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "confirmed");
        assert_eq!(json["explorerUrl"], "https://solscan.io/tx/abc");
    }
}
