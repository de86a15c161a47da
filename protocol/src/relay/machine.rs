//! The relay state machine.
//!
//! [`RelayProtocol`] ties the pieces together: it parses inbound frames,
//! checks each action against the session's state and the caller's role,
//! drives the store, and decides who hears about what.
//!
//! | Action | Needs | Replies to |
//! |---|---|---|
//! | `createSession` | valid details | caller |
//! | `joinSession` | session `Created` | caller |
//! | `requestTransactionDetails` | `Created`/`Joined`, caller bound | caller |
//! | `submitTransaction` | `Joined`, caller is the client, valid signature | both sides |
//!
//! Submission hands off to a detached task so the submitting connection
//! can go away without cancelling a broadcast that is already in flight.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{RelayConfig, CLOSE_GOING_AWAY};
use crate::events::{EventBus, RelayEvent};
use crate::ledger::{LedgerClient, SignedPayload};
use crate::session::{
    ConnectionId, Role, SessionError, SessionId, SessionState, SessionStore, SubmissionOutcome,
    TransactionDetails,
};
use crate::submission::{SubmissionAdapter, SubmissionError};

use super::envelope::{RawEnvelope, Request, ServerMessage, UNKNOWN_ACTION};
use super::error::RelayError;
use super::router::{ConnectionRouter, Outbound};

/// Action label on error envelopes for adapter failures.
pub const TRANSACTION_FAILED: &str = "transactionFailed";

/// Error code the counterparty sees when a submission fails.
pub const SUBMISSION_FAILED: &str = "submissionFailed";

pub struct RelayProtocol {
    config: RelayConfig,
    store: Arc<SessionStore>,
    router: Arc<ConnectionRouter>,
    adapter: Arc<SubmissionAdapter>,
    events: EventBus,
}

impl RelayProtocol {
    pub fn new(config: RelayConfig, ledger: Arc<dyn LedgerClient>) -> Arc<Self> {
        let events = EventBus::new();
        let store = SessionStore::new(&config, events.clone());
        let adapter = Arc::new(SubmissionAdapter::new(ledger, config.submission.clone()));
        Arc::new(Self {
            config,
            store,
            router: Arc::new(ConnectionRouter::new()),
            adapter,
            events,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        self.adapter.ledger()
    }

    // -- connection lifecycle -------------------------------------------------

    /// Accept a new connection.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let (id, rx) = self.router.register();
        self.events
            .publish(RelayEvent::ConnectionOpened { connection_id: id });
        (id, rx)
    }

    /// Tear down a connection. Sessions it was bound to stay alive; any
    /// submission in flight runs to completion.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.router.unregister(connection);
        self.store.detach_connection(connection);
        self.events.publish(RelayEvent::ConnectionClosed {
            connection_id: connection,
        });
        debug!(connection_id = %connection, "connection closed");
    }

    /// Close every connection with 1001. Call on shutdown.
    pub fn shutdown(&self) -> usize {
        self.router.close_all(CLOSE_GOING_AWAY, "server shutting down")
    }

    // -- inbound --------------------------------------------------------------

    /// Handle one text frame from `connection`.
    pub fn handle_text(self: &Arc<Self>, connection: ConnectionId, text: &str) {
        let raw = match RawEnvelope::parse(text) {
            Ok(raw) => raw,
            Err(e) => return self.reject(connection, UNKNOWN_ACTION, e),
        };
        let action = raw.action_label().to_string();
        debug!(connection_id = %connection, action = %action, "inbound frame");

        let result = raw.into_request().and_then(|request| match request {
            Request::CreateSession { details } => self.create_session(connection, details),
            Request::JoinSession { session_id } => self.join_session(connection, session_id),
            Request::RequestTransactionDetails { session_id } => {
                self.request_details(connection, session_id)
            }
            Request::SubmitTransaction {
                session_id,
                payload,
            } => self.submit_transaction(connection, session_id, payload),
        });

        if let Err(e) = result {
            self.reject(connection, &action, e);
        }
    }

    /// Binary frames are not part of the protocol.
    pub fn handle_binary(&self, connection: ConnectionId) {
        self.reject(
            connection,
            UNKNOWN_ACTION,
            RelayError::Protocol("binary frames are not supported".into()),
        );
    }

    // -- actions --------------------------------------------------------------

    fn create_session(
        &self,
        connection: ConnectionId,
        details: TransactionDetails,
    ) -> Result<(), RelayError> {
        let session_id = self.store.create(details, connection);
        self.router
            .send(connection, &ServerMessage::SessionCreated { session_id });
        Ok(())
    }

    fn join_session(&self, connection: ConnectionId, session_id: SessionId) -> Result<(), RelayError> {
        self.store.mark_joined(&session_id, connection)?;
        self.router
            .send(connection, &ServerMessage::JoinedSession { session_id });
        Ok(())
    }

    fn request_details(
        &self,
        connection: ConnectionId,
        session_id: SessionId,
    ) -> Result<(), RelayError> {
        let session = self.store.get(&session_id)?;
        match session.state {
            SessionState::Created | SessionState::Joined => {}
            SessionState::Expired => return Err(SessionError::Expired(session_id).into()),
            SessionState::Submitted | SessionState::Finalized => {
                return Err(SessionError::SessionClosed.into())
            }
        }
        if session.role_of(connection).is_none() {
            return Err(SessionError::NotBound.into());
        }

        self.router.send(
            connection,
            &ServerMessage::TransactionDetails {
                session_id,
                details: session.details,
            },
        );
        Ok(())
    }

    fn submit_transaction(
        self: &Arc<Self>,
        connection: ConnectionId,
        session_id: SessionId,
        payload: SignedPayload,
    ) -> Result<(), RelayError> {
        let session = self.store.get(&session_id)?;
        match session.state {
            SessionState::Expired => return Err(SessionError::Expired(session_id).into()),
            SessionState::Created => return Err(SessionError::NotJoined.into()),
            _ => {}
        }
        if session.role_of(connection) != Some(Role::Client) {
            return Err(SessionError::NotBound.into());
        }
        if session.signed_payload.is_some() {
            return Err(SessionError::DuplicateSubmission.into());
        }
        if !self
            .ledger()
            .verify_signature(&payload, session.details.as_bytes())
        {
            warn!(session_id = %session_id, connection_id = %connection, "invalid client signature");
            return Err(RelayError::InvalidSignature);
        }

        // Re-checked under the session lock: only one submission wins.
        let session = self
            .store
            .record_submission(&session_id, connection, payload.clone())?;

        info!(session_id = %session_id, "transaction submitted");
        self.router.fan_out(
            &session.bound_connections(),
            &ServerMessage::TransactionSubmitted {
                session_id: session_id.clone(),
            },
        );
        self.events.publish(RelayEvent::SubmissionStarted {
            session_id: session_id.clone(),
        });

        let relay = Arc::clone(self);
        tokio::spawn(async move {
            relay.run_submission(connection, session_id, payload).await;
        });
        Ok(())
    }

    // -- submission -----------------------------------------------------------

    async fn run_submission(
        &self,
        submitter: ConnectionId,
        session_id: SessionId,
        payload: SignedPayload,
    ) {
        let started = Instant::now();
        let result = self.adapter.submit(&payload).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(receipt) => SubmissionOutcome::Confirmed {
                signature: receipt.signature.clone(),
                explorer_url: receipt.explorer_url.clone(),
            },
            Err(e) => SubmissionOutcome::Failed {
                code: e.code().to_string(),
                reason: e.to_string(),
            },
        };

        let recipients = match self.store.record_outcome(&session_id, outcome) {
            Ok(session) => session.bound_connections(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "could not record submission outcome");
                self.store
                    .get(&session_id)
                    .map(|s| s.bound_connections())
                    .unwrap_or_default()
            }
        };

        self.events.publish(RelayEvent::SubmissionFinished {
            session_id: session_id.clone(),
            success: result.is_ok(),
            elapsed,
        });

        match result {
            Ok(receipt) => {
                info!(session_id = %session_id, tx = %receipt.signature, ?elapsed, "transaction confirmed");
                self.router.fan_out(
                    &recipients,
                    &ServerMessage::TransactionConfirmed {
                        session_id,
                        signature: receipt.signature,
                        explorer_url: receipt.explorer_url,
                    },
                );
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, ?elapsed, "submission failed");
                for recipient in recipients {
                    let message = failure_message(&session_id, &e, recipient == submitter);
                    self.router.send(recipient, &message);
                }
            }
        }
    }

    // -- errors ---------------------------------------------------------------

    fn reject(&self, connection: ConnectionId, action: &str, err: RelayError) {
        debug!(connection_id = %connection, action, error = %err, "request rejected");
        self.router
            .send(connection, &ServerMessage::error(action, &err));

        if err.is_protocol_error() {
            self.events.publish(RelayEvent::ProtocolViolation {
                connection_id: connection,
                code: err.code(),
            });
        }
        if let Some(code) = err.close_code(self.config.close_on_invalid_session) {
            info!(connection_id = %connection, code, error = err.code(), "closing connection");
            self.router.close(connection, code, err.code());
        }
    }
}

/// Error envelope for a failed submission. The submitter learns the exact
/// cause; the other side only that it failed.
fn failure_message(session_id: &SessionId, err: &SubmissionError, to_submitter: bool) -> ServerMessage {
    let code = if to_submitter {
        err.code()
    } else {
        SUBMISSION_FAILED
    };
    ServerMessage::Error {
        action: TRANSACTION_FAILED.to_string(),
        code,
        message: err.to_string(),
        session_id: Some(session_id.clone()),
    }
}
