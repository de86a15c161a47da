//! # Ledger Client
//!
//! The relay never talks to a ledger directly. Everything it needs
//! (checking a client's signature, co-signing as fee payer, broadcasting,
//! polling for confirmation) goes through the [`LedgerClient`] trait.
//!
//! Two implementations ship with the crate:
//!
//! - [`LocalLedger`]: in-process devnet ledger. Default for local runs and
//!   the backbone of the test suite, with knobs to inject faults.
//! - [`RpcLedger`]: JSON-RPC over HTTP against a Solana-style node that
//!   accepts the relay's own wire layout.
//!
//! ## Transaction shape
//!
//! The message both parties sign is the exact transaction-details JSON the
//! merchant supplied. The client signs it first; the relay's fee payer adds
//! the second signature. The fee payer's signature doubles as the
//! transaction id, which is what explorers index.

pub mod local;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crypto::{verify_base58, Keypair, PublicKey, Signature};

pub use local::{FaultPlan, LocalLedger};
pub use rpc::RpcLedger;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a ledger client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Worth retrying: network hiccup, node busy, rate limited.
    #[error("transient ledger failure: {0}")]
    Transient(String),

    /// The ledger understood the transaction and refused it. Retrying the
    /// same bytes will not help.
    #[error("ledger rejected transaction: {0}")]
    Rejected(String),

    /// The payload could not even be turned into a transaction.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// What a client sends in `submitTransaction`. All fields are base58.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    /// The signed message: base58 of the transaction-details bytes.
    pub message: String,
    /// Detached Ed25519 signature over the decoded message.
    pub signature: String,
    /// The signer.
    pub client_public_key: String,
}

impl SignedPayload {
    /// Build a payload by signing `message` with `keypair`. Used by wallets,
    /// tests and the bench.
    pub fn sign(keypair: &Keypair, message: &[u8]) -> Self {
        Self {
            message: bs58::encode(message).into_string(),
            signature: keypair.sign(message).to_base58(),
            client_public_key: keypair.public_key().to_base58(),
        }
    }

    /// Decode the base58 message.
    pub fn decode_message(&self) -> Result<Vec<u8>, LedgerError> {
        bs58::decode(&self.message)
            .into_vec()
            .map_err(|e| LedgerError::InvalidPayload(format!("message is not base58: {e}")))
    }
}

/// A payload carrying both the client's and the fee payer's signatures,
/// ready to broadcast.
#[derive(Clone, PartialEq, Eq)]
pub struct CoSignedTransaction {
    pub message: Vec<u8>,
    pub fee_payer: PublicKey,
    pub fee_payer_signature: Signature,
    pub client: PublicKey,
    pub client_signature: Signature,
}

impl CoSignedTransaction {
    /// Check both signatures over the message.
    pub fn verify(&self) -> bool {
        self.fee_payer.verify(&self.message, &self.fee_payer_signature)
            && self.client.verify(&self.message, &self.client_signature)
    }

    /// Transaction id: the fee payer's signature in base58.
    pub fn id(&self) -> String {
        self.fee_payer_signature.to_base58()
    }

    /// Wire encoding. Signature count, signatures (fee payer first), then
    /// the signer keys in the same order, then the message.
    ///
    /// This is the relay's own layout, not a Solana transaction. The node
    /// behind [`RpcLedger`] has to understand it.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 2 * 64 + 2 * 32 + self.message.len());
        out.push(2u8);
        out.extend_from_slice(self.fee_payer_signature.as_bytes());
        out.extend_from_slice(self.client_signature.as_bytes());
        out.extend_from_slice(self.fee_payer.as_bytes());
        out.extend_from_slice(self.client.as_bytes());
        out.extend_from_slice(&self.message);
        out
    }
}

impl fmt::Debug for CoSignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoSignedTransaction")
            .field("id", &self.id())
            .field("fee_payer", &self.fee_payer)
            .field("client", &self.client)
            .field("message_len", &self.message.len())
            .finish()
    }
}

/// Handle to a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionRef {
    pub signature: String,
}

impl fmt::Display for SubmissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature)
    }
}

/// Where a broadcast transaction stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    /// Landed but failed on chain.
    Failed(String),
}

// ---------------------------------------------------------------------------
// LedgerClient
// ---------------------------------------------------------------------------

/// Everything the relay needs from a ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Whether `payload` is a valid client signature over exactly
    /// `expected_message`.
    fn verify_signature(&self, payload: &SignedPayload, expected_message: &[u8]) -> bool {
        verify_client_signature(payload, expected_message)
    }

    /// The relay's fee-payer public key.
    fn fee_payer(&self) -> PublicKey;

    /// Add the fee payer's signature to a client-signed payload.
    async fn co_sign_as_fee_payer(
        &self,
        payload: &SignedPayload,
    ) -> Result<CoSignedTransaction, LedgerError>;

    /// Send a fully signed transaction. One attempt; retries are the
    /// caller's business.
    async fn broadcast(&self, tx: &CoSignedTransaction) -> Result<SubmissionRef, LedgerError>;

    /// Poll the status of a broadcast transaction once.
    async fn confirm(&self, reference: &SubmissionRef) -> Result<ConfirmationStatus, LedgerError>;

    /// Public explorer link for a transaction.
    fn audit_url(&self, reference: &SubmissionRef) -> String;

    /// Whether co-signing may run concurrently. Clients whose signer keeps
    /// per-transaction state should leave this false.
    fn concurrent_signing(&self) -> bool {
        false
    }
}

/// Check a client payload: the message must decode to exactly
/// `expected_message` and the signature must verify for the claimed key.
pub fn verify_client_signature(payload: &SignedPayload, expected_message: &[u8]) -> bool {
    let Ok(message) = payload.decode_message() else {
        return false;
    };
    if message != expected_message {
        return false;
    }
    verify_base58(&payload.client_public_key, &message, &payload.signature).is_ok()
}

/// Co-sign a client payload with `fee_payer`. Shared by the shipped
/// clients.
pub(crate) fn co_sign(
    fee_payer: &Keypair,
    payload: &SignedPayload,
) -> Result<CoSignedTransaction, LedgerError> {
    let message = payload.decode_message()?;
    let client = PublicKey::from_base58(&payload.client_public_key)
        .map_err(|e| LedgerError::InvalidPayload(format!("clientPublicKey: {e}")))?;
    let client_signature = Signature::from_base58(&payload.signature)
        .map_err(|e| LedgerError::InvalidPayload(format!("signature: {e}")))?;

    Ok(CoSignedTransaction {
        fee_payer_signature: fee_payer.sign(&message),
        fee_payer: fee_payer.public_key(),
        client,
        client_signature,
        message,
    })
}

/// Explorer link: base URL with the signature appended.
pub(crate) fn explorer_link(base: &str, reference: &SubmissionRef) -> String {
    format!("{base}{}", reference.signature)
}
