//! JSON-RPC ledger client.
//!
//! Speaks the two Solana-style methods the relay needs:
//! `sendTransaction` (base58-encoded wire bytes) and
//! `getSignatureStatuses`. Errors are sorted into transient and
//! semantic so the submission adapter knows what to retry:
//!
//! | Failure | Classified as |
//! |---|---|
//! | connect error, timeout, HTTP 429 / 5xx | `Transient` |
//! | RPC error -32005 (node unhealthy), -32004 (slot skipped) | `Transient` |
//! | any other RPC error | `Rejected` |
//! | malformed response body | `Transient` |
//!
//! ## Wire format
//!
//! The method names and envelopes are Solana's, the transaction bytes are
//! not. `sendTransaction` carries [`CoSignedTransaction::to_wire`]: a
//! signature count of 2, the fee payer's and client's signatures, their
//! two public keys, then the raw message the client signed. A stock
//! Solana validator will reject it as a malformed transaction. Point
//! `--ledger-url` at a gateway that accepts this layout and does the
//! translation to a native transaction itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::DEFAULT_EXPLORER_BASE_URL;
use crate::crypto::{Keypair, PublicKey};

use super::{
    co_sign, explorer_link, CoSignedTransaction, ConfirmationStatus, LedgerClient, LedgerError,
    SignedPayload, SubmissionRef,
};

/// Per-request HTTP timeout.
const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// RPC error codes that mean "try again later".
const TRANSIENT_RPC_CODES: &[i64] = &[-32004, -32005];

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct StatusesResult {
    value: Vec<Option<SignatureStatus>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

/// Ledger client backed by a JSON-RPC endpoint.
pub struct RpcLedger {
    http: reqwest::Client,
    url: String,
    fee_payer: Keypair,
    explorer_base: String,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, fee_payer: Keypair) -> Self {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
            fee_payer,
            explorer_base: DEFAULT_EXPLORER_BASE_URL.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_explorer_base(mut self, base: impl Into<String>) -> Self {
        self.explorer_base = base.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transient(format!("{method}: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LedgerError::Transient(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(LedgerError::Rejected(format!("{method}: HTTP {status}")));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Transient(format!("{method}: bad response: {e}")))?;

        if let Some(err) = body.error {
            warn!(method, code = err.code, message = %err.message, "rpc error");
            return Err(if TRANSIENT_RPC_CODES.contains(&err.code) {
                LedgerError::Transient(err.message)
            } else {
                LedgerError::Rejected(err.message)
            });
        }

        body.result
            .ok_or_else(|| LedgerError::Transient(format!("{method}: empty result")))
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    fn fee_payer(&self) -> PublicKey {
        self.fee_payer.public_key()
    }

    async fn co_sign_as_fee_payer(
        &self,
        payload: &SignedPayload,
    ) -> Result<CoSignedTransaction, LedgerError> {
        co_sign(&self.fee_payer, payload)
    }

    async fn broadcast(&self, tx: &CoSignedTransaction) -> Result<SubmissionRef, LedgerError> {
        let encoded = bs58::encode(tx.to_wire()).into_string();
        // The adapter owns retries; the node must not retry on its own.
        let params = json!([
            encoded,
            {
                "encoding": "base58",
                "skipPreflight": false,
                "preflightCommitment": "confirmed",
                "maxRetries": 0
            }
        ]);
        let signature: String = self.call("sendTransaction", params).await?;
        debug!(tx = %signature, "transaction sent");
        Ok(SubmissionRef { signature })
    }

    async fn confirm(&self, reference: &SubmissionRef) -> Result<ConfirmationStatus, LedgerError> {
        let params = json!([[reference.signature], { "searchTransactionHistory": true }]);
        let result: StatusesResult = self.call("getSignatureStatuses", params).await?;

        let Some(Some(status)) = result.value.into_iter().next() else {
            return Ok(ConfirmationStatus::Pending);
        };
        if let Some(err) = status.err {
            return Ok(ConfirmationStatus::Failed(err.to_string()));
        }
        match status.confirmation_status.as_deref() {
            Some("confirmed") | Some("finalized") => Ok(ConfirmationStatus::Confirmed),
            _ => Ok(ConfirmationStatus::Pending),
        }
    }

    fn audit_url(&self, reference: &SubmissionRef) -> String {
        explorer_link(&self.explorer_base, reference)
    }
}
