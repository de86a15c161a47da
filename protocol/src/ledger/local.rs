//! In-process devnet ledger.
//!
//! Accepts any correctly co-signed transaction and confirms it on the next
//! poll. A [`FaultPlan`] lets tests (and curious operators) make it
//! misbehave in the ways a real RPC node does: flaky broadcasts, outright
//! rejection, transactions that never confirm.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::DEFAULT_EXPLORER_BASE_URL;
use crate::crypto::{Keypair, PublicKey};

use super::{
    co_sign, explorer_link, CoSignedTransaction, ConfirmationStatus, LedgerClient, LedgerError,
    SignedPayload, SubmissionRef,
};

/// Misbehaviour to inject.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Number of upcoming broadcasts that fail with a transient error.
    pub transient_failures: u32,
    /// Reject every broadcast with this reason.
    pub reject_with: Option<String>,
    /// Report every transaction as pending forever.
    pub never_confirm: bool,
    /// Report confirmed transactions as failed on chain with this reason.
    pub fail_on_chain: Option<String>,
    /// Produce fee-payer signatures that do not verify.
    pub corrupt_co_signature: bool,
}

/// In-memory ledger.
pub struct LocalLedger {
    fee_payer: Keypair,
    explorer_base: String,
    faults: Mutex<FaultPlan>,
    landed: Mutex<HashMap<String, CoSignedTransaction>>,
    broadcast_attempts: AtomicU32,
}

impl LocalLedger {
    pub fn new(fee_payer: Keypair) -> Self {
        Self {
            fee_payer,
            explorer_base: DEFAULT_EXPLORER_BASE_URL.to_string(),
            faults: Mutex::new(FaultPlan::default()),
            landed: Mutex::new(HashMap::new()),
            broadcast_attempts: AtomicU32::new(0),
        }
    }

    pub fn with_explorer_base(mut self, base: impl Into<String>) -> Self {
        self.explorer_base = base.into();
        self
    }

    pub fn with_faults(self, faults: FaultPlan) -> Self {
        *self.faults.lock() = faults;
        self
    }

    /// Replace the fault plan on a running ledger.
    pub fn set_faults(&self, faults: FaultPlan) {
        *self.faults.lock() = faults;
    }

    /// Broadcast calls seen so far, failed ones included.
    pub fn broadcast_attempts(&self) -> u32 {
        self.broadcast_attempts.load(Ordering::SeqCst)
    }

    /// A transaction that made it onto the ledger.
    pub fn transaction(&self, id: &str) -> Option<CoSignedTransaction> {
        self.landed.lock().get(id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.landed.lock().len()
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    fn fee_payer(&self) -> PublicKey {
        self.fee_payer.public_key()
    }

    async fn co_sign_as_fee_payer(
        &self,
        payload: &SignedPayload,
    ) -> Result<CoSignedTransaction, LedgerError> {
        let mut tx = co_sign(&self.fee_payer, payload)?;
        if self.faults.lock().corrupt_co_signature {
            tx.fee_payer_signature = self.fee_payer.sign(b"not the message");
        }
        Ok(tx)
    }

    async fn broadcast(&self, tx: &CoSignedTransaction) -> Result<SubmissionRef, LedgerError> {
        let attempt = self.broadcast_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut faults = self.faults.lock();
            if faults.transient_failures > 0 {
                faults.transient_failures -= 1;
                debug!(attempt, "local ledger: injected transient failure");
                return Err(LedgerError::Transient("node is behind".into()));
            }
            if let Some(reason) = &faults.reject_with {
                return Err(LedgerError::Rejected(reason.clone()));
            }
        }

        if !tx.verify() {
            return Err(LedgerError::Rejected("signature verification failure".into()));
        }

        let id = tx.id();
        // Re-broadcasting the same bytes is a no-op, as on a real ledger.
        self.landed
            .lock()
            .entry(id.clone())
            .or_insert_with(|| tx.clone());
        debug!(attempt, tx = %id, "local ledger: transaction landed");
        Ok(SubmissionRef { signature: id })
    }

    async fn confirm(&self, reference: &SubmissionRef) -> Result<ConfirmationStatus, LedgerError> {
        if !self.landed.lock().contains_key(&reference.signature) {
            return Ok(ConfirmationStatus::Pending);
        }
        let faults = self.faults.lock();
        if faults.never_confirm {
            return Ok(ConfirmationStatus::Pending);
        }
        if let Some(reason) = &faults.fail_on_chain {
            return Ok(ConfirmationStatus::Failed(reason.clone()));
        }
        Ok(ConfirmationStatus::Confirmed)
    }

    fn audit_url(&self, reference: &SubmissionRef) -> String {
        explorer_link(&self.explorer_base, reference)
    }

    fn concurrent_signing(&self) -> bool {
        // Plain Ed25519 signing keeps no state between transactions.
        true
    }
}
