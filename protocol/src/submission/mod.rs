//! # Submission Adapter
//!
//! Turns a client-signed payload into a confirmed ledger transaction:
//!
//! 1. Co-sign as fee payer. Serialized across sessions unless the ledger
//!    client says its signer is safe to run concurrently.
//! 2. Re-verify the fully signed transaction before it leaves the process.
//! 3. Broadcast, retrying transient failures with exponential backoff.
//!    Semantic rejections are final.
//! 4. Poll for confirmation until the policy's timeout.
//!
//! The adapter knows nothing about sessions or connections. The relay
//! state machine calls [`SubmissionAdapter::submit`] from a detached task
//! and fans the result out itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SubmissionPolicy;
use crate::ledger::{
    CoSignedTransaction, ConfirmationStatus, LedgerClient, SignedPayload, SubmissionRef,
};

// ---------------------------------------------------------------------------
// Errors & Receipt
// ---------------------------------------------------------------------------

/// Why a submission did not end in a confirmed transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("transaction not confirmed within {0:?}")]
    ConfirmationTimeout(Duration),

    #[error("co-signed transaction failed signature verification")]
    SignatureVerificationFailed,
}

impl SubmissionError {
    /// Wire code for the submitter's error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionError::BroadcastFailed(_) => "broadcastFailed",
            SubmissionError::ConfirmationTimeout(_) => "confirmationTimeout",
            SubmissionError::SignatureVerificationFailed => "signatureVerificationFailed",
        }
    }
}

/// A confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Transaction signature as the ledger indexes it.
    pub signature: String,
    /// Public explorer link for the transaction.
    pub explorer_url: String,
    /// Broadcast attempts it took.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct SubmissionAdapter {
    ledger: Arc<dyn LedgerClient>,
    policy: SubmissionPolicy,
    signing: Mutex<()>,
}

impl SubmissionAdapter {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: SubmissionPolicy) -> Self {
        Self {
            ledger,
            policy,
            signing: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Co-sign, broadcast and confirm one payload.
    pub async fn submit(
        &self,
        payload: &SignedPayload,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let tx = self.co_sign(payload).await?;
        if !tx.verify() {
            warn!(tx = %tx.id(), "co-signed transaction failed verification");
            return Err(SubmissionError::SignatureVerificationFailed);
        }

        let (reference, attempts) = self.broadcast_with_retry(&tx).await?;
        self.await_confirmation(&reference).await?;

        let explorer_url = self.ledger.audit_url(&reference);
        info!(tx = %reference, attempts, "transaction confirmed");
        Ok(SubmissionReceipt {
            signature: reference.signature,
            explorer_url,
            attempts,
        })
    }

    async fn co_sign(&self, payload: &SignedPayload) -> Result<CoSignedTransaction, SubmissionError> {
        let _guard = if self.ledger.concurrent_signing() {
            None
        } else {
            Some(self.signing.lock().await)
        };
        self.ledger
            .co_sign_as_fee_payer(payload)
            .await
            .map_err(|e| SubmissionError::BroadcastFailed(format!("co-signing: {e}")))
    }

    async fn broadcast_with_retry(
        &self,
        tx: &CoSignedTransaction,
    ) -> Result<(SubmissionRef, u32), SubmissionError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.ledger.broadcast(tx).await {
                Ok(reference) => return Ok((reference, attempt)),
                Err(e) if e.is_transient() && attempt < self.policy.max_broadcast_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(attempt, ?delay, error = %e, "broadcast failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "broadcast failed, giving up");
                    return Err(SubmissionError::BroadcastFailed(e.to_string()));
                }
            }
        }
    }

    async fn await_confirmation(&self, reference: &SubmissionRef) -> Result<(), SubmissionError> {
        let started = Instant::now();
        let poll = async {
            loop {
                match self.ledger.confirm(reference).await {
                    Ok(ConfirmationStatus::Confirmed) => return Ok(()),
                    Ok(ConfirmationStatus::Failed(reason)) => {
                        return Err(SubmissionError::BroadcastFailed(reason))
                    }
                    Ok(ConfirmationStatus::Pending) => {}
                    Err(e) if e.is_transient() => {
                        debug!(tx = %reference, error = %e, "confirmation poll failed");
                    }
                    Err(e) => return Err(SubmissionError::BroadcastFailed(e.to_string())),
                }
                tokio::time::sleep(self.policy.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.policy.confirmation_timeout, poll).await {
            Ok(result) => {
                debug!(tx = %reference, elapsed = ?started.elapsed(), "confirmation resolved");
                result
            }
            Err(_) => {
                warn!(tx = %reference, "confirmation timed out");
                Err(SubmissionError::ConfirmationTimeout(
                    self.policy.confirmation_timeout,
                ))
            }
        }
    }
}
