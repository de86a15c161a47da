//! Authoritative session map.
//!
//! ## Design
//!
//! - `DashMap` gives concurrent lookup by session id without a global lock.
//! - Every session sits behind its own `parking_lot::Mutex`. All state
//!   transitions for a session happen under that lock, so a join racing an
//!   expiry, or two submissions racing each other, resolve to exactly one
//!   winner.
//! - Lock order is always map shard → session. Code holding a session lock
//!   never touches the map.
//! - Timer callbacks hold a `Weak<SessionStore>` so a dropped store is never
//!   kept alive by pending timers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::crypto::fingerprint;
use crate::events::{EventBus, RelayEvent};
use crate::ledger::SignedPayload;

use super::error::SessionError;
use super::expiry::{ExpiryHandle, ExpiryScheduler};
use super::types::{
    ConnectionId, SessionId, SessionSnapshot, SessionState, SubmissionOutcome,
    TransactionDetails,
};

// ---------------------------------------------------------------------------
// Session entity
// ---------------------------------------------------------------------------

/// The live session record. Only reachable through the store.
struct Session {
    id: SessionId,
    state: SessionState,
    details: TransactionDetails,
    merchant: Option<ConnectionId>,
    client: Option<ConnectionId>,
    signed_payload: Option<SignedPayload>,
    outcome: Option<SubmissionOutcome>,
    created_at: DateTime<Utc>,
    /// Armed at creation, taken on join or expiry.
    expiry: Option<ExpiryHandle>,
    /// Armed once the session is finished, removes the tombstone.
    purge: Option<ExpiryHandle>,
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            details: self.details.clone(),
            merchant: self.merchant,
            client: self.client,
            signed_payload: self.signed_payload.clone(),
            outcome: self.outcome.clone(),
            created_at: self.created_at,
        }
    }

    fn is_finished(&self) -> bool {
        self.state.is_terminal() || self.outcome.is_some() || self.is_abandoned()
    }

    /// Joined, but the client left before submitting. Nobody can submit
    /// and nobody can join again.
    fn is_abandoned(&self) -> bool {
        self.state == SessionState::Joined
            && self.client.is_none()
            && self.signed_payload.is_none()
    }
}

// ---------------------------------------------------------------------------
// StateCounts
// ---------------------------------------------------------------------------

/// Number of sessions currently held in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub created: usize,
    pub joined: usize,
    pub submitted: usize,
    pub finalized: usize,
    pub expired: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.created + self.joined + self.submitted + self.finalized + self.expired
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Owns every session in the process.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    session_timeout: Duration,
    retention: Duration,
    scheduler: ExpiryScheduler,
    events: EventBus,
    me: Weak<SessionStore>,
}

impl SessionStore {
    /// Build a store. Returned as `Arc` because timers need a weak
    /// back-reference.
    pub fn new(config: &RelayConfig, events: EventBus) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            sessions: DashMap::new(),
            session_timeout: config.session_timeout,
            retention: config.retention,
            scheduler: ExpiryScheduler,
            events,
            me: me.clone(),
        })
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Create a session in `Created`, bound to `merchant`, and arm its
    /// expiry timer.
    pub fn create(&self, details: TransactionDetails, merchant: ConnectionId) -> SessionId {
        let amount = details.amount();
        let details_fp = fingerprint(details.as_bytes());

        let (id, entry) = loop {
            let id = SessionId::generate();
            match self.sessions.entry(id.clone()) {
                // v4 collisions do not happen in practice, but never reuse.
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let entry = Arc::new(Mutex::new(Session {
                        id: id.clone(),
                        state: SessionState::Created,
                        details,
                        merchant: Some(merchant),
                        client: None,
                        signed_payload: None,
                        outcome: None,
                        created_at: Utc::now(),
                        expiry: None,
                        purge: None,
                    }));
                    slot.insert(entry.clone());
                    break (id, entry);
                }
            }
        };

        let handle = self.arm_expiry(id.clone());
        entry.lock().expiry = Some(handle);

        info!(
            session_id = %id,
            connection_id = %merchant,
            amount,
            details = %details_fp,
            "session created"
        );
        self.events.publish(RelayEvent::SessionCreated {
            session_id: id.clone(),
        });
        id
    }

    /// Snapshot of a session, whatever its state.
    pub fn get(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        let entry = self.entry(id)?;
        let snapshot = entry.lock().snapshot();
        Ok(snapshot)
    }

    /// Bind `client` to a session in `Created` and cancel its expiry.
    pub fn mark_joined(
        &self,
        id: &SessionId,
        client: ConnectionId,
    ) -> Result<SessionSnapshot, SessionError> {
        let entry = self.entry(id)?;
        let snapshot = {
            let mut session = entry.lock();
            match session.state {
                SessionState::Created => {}
                SessionState::Expired => return Err(SessionError::Expired(id.clone())),
                SessionState::Joined | SessionState::Submitted | SessionState::Finalized => {
                    return Err(SessionError::AlreadyJoined)
                }
            }
            if session.client.is_some() {
                return Err(SessionError::AlreadyJoined);
            }

            if let Some(handle) = session.expiry.take() {
                handle.cancel();
            }
            session.client = Some(client);
            session.state = SessionState::Joined;
            session.snapshot()
        };

        info!(session_id = %id, connection_id = %client, "client joined session");
        self.events.publish(RelayEvent::SessionJoined {
            session_id: id.clone(),
        });
        Ok(snapshot)
    }

    /// Expire a session that is still waiting for a client.
    ///
    /// Idempotent. Returns `false` (and changes nothing) if the session is
    /// gone or has moved past `Created`.
    pub fn mark_expired(&self, id: &SessionId) -> bool {
        let Ok(entry) = self.entry(id) else {
            return false;
        };
        {
            let mut session = entry.lock();
            if session.state != SessionState::Created {
                debug!(session_id = %id, state = %session.state, "expiry ignored");
                return false;
            }
            if let Some(handle) = session.expiry.take() {
                handle.cancel();
            }
            session.state = SessionState::Expired;
            session.purge = Some(self.arm_purge(id.clone()));
        }

        info!(session_id = %id, "session expired without a client");
        self.events.publish(RelayEvent::SessionExpired {
            session_id: id.clone(),
        });
        true
    }

    /// Store the client's signed payload and move to `Submitted`.
    ///
    /// Only the bound client may submit, and only once.
    pub fn record_submission(
        &self,
        id: &SessionId,
        client: ConnectionId,
        payload: SignedPayload,
    ) -> Result<SessionSnapshot, SessionError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        match session.state {
            SessionState::Expired => return Err(SessionError::Expired(id.clone())),
            SessionState::Created => return Err(SessionError::NotJoined),
            _ => {}
        }
        if session.client != Some(client) {
            return Err(SessionError::NotBound);
        }
        if session.state != SessionState::Joined || session.signed_payload.is_some() {
            return Err(SessionError::DuplicateSubmission);
        }

        session.signed_payload = Some(payload);
        session.state = SessionState::Submitted;
        debug!(session_id = %id, "signed payload recorded");
        Ok(session.snapshot())
    }

    /// Record what the submission adapter reported.
    ///
    /// A confirmed outcome finalizes the session. A failed one leaves it in
    /// `Submitted`; either way the session is finished and will be purged
    /// after the retention window.
    pub fn record_outcome(
        &self,
        id: &SessionId,
        outcome: SubmissionOutcome,
    ) -> Result<SessionSnapshot, SessionError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        if session.state != SessionState::Submitted || session.outcome.is_some() {
            return Err(SessionError::SessionClosed);
        }

        if outcome.is_confirmed() {
            session.state = SessionState::Finalized;
        }
        session.outcome = Some(outcome);
        session.purge = Some(self.arm_purge(id.clone()));
        debug!(session_id = %id, state = %session.state, "submission outcome recorded");
        Ok(session.snapshot())
    }

    /// Forget a closed connection in every session it was bound to.
    ///
    /// A joined session whose client leaves before submitting can never
    /// progress, so it is scheduled for purge like any finished session.
    /// Returns how many sessions referenced it.
    pub fn detach_connection(&self, connection: ConnectionId) -> usize {
        let mut detached = 0;
        for item in self.sessions.iter() {
            let mut session = item.value().lock();
            let mut hit = false;
            if session.merchant == Some(connection) {
                session.merchant = None;
                hit = true;
            }
            if session.client == Some(connection) {
                session.client = None;
                hit = true;
            }
            if !hit {
                continue;
            }
            detached += 1;
            if session.is_abandoned() && session.purge.is_none() {
                debug!(session_id = %session.id, "client left before submitting");
                session.purge = Some(self.arm_purge(session.id.clone()));
            }
        }
        if detached > 0 {
            debug!(connection_id = %connection, sessions = detached, "connection detached");
        }
        detached
    }

    /// Number of sessions held, tombstones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn count_by_state(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for item in self.sessions.iter() {
            match item.value().lock().state {
                SessionState::Created => counts.created += 1,
                SessionState::Joined => counts.joined += 1,
                SessionState::Submitted => counts.submitted += 1,
                SessionState::Finalized => counts.finalized += 1,
                SessionState::Expired => counts.expired += 1,
            }
        }
        counts
    }

    // -- internals ----------------------------------------------------------

    fn entry(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    fn arm_expiry(&self, id: SessionId) -> ExpiryHandle {
        let store = self.me.clone();
        self.scheduler.arm(self.session_timeout, move || {
            if let Some(store) = store.upgrade() {
                store.mark_expired(&id);
            }
        })
    }

    fn arm_purge(&self, id: SessionId) -> ExpiryHandle {
        let store = self.me.clone();
        self.scheduler.arm(self.retention, move || {
            if let Some(store) = store.upgrade() {
                store.purge(&id);
            }
        })
    }

    /// Drop a finished session's tombstone.
    fn purge(&self, id: &SessionId) {
        let removed = self
            .sessions
            .remove_if(id, |_, session| session.lock().is_finished())
            .is_some();
        if removed {
            debug!(session_id = %id, "session purged");
            self.events.publish(RelayEvent::SessionPurged {
                session_id: id.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const DETAILS: &str = r#"{"amount":1000000,"merchantId":"7","merchantUsdcAccount":"BbbT","daoUsdcAccount":"Ct7d","stateAccount":"5Hzk"}"#;

    fn store() -> Arc<SessionStore> {
        SessionStore::new(&RelayConfig::default(), EventBus::new())
    }

    fn details() -> TransactionDetails {
        TransactionDetails::from_json(DETAILS).unwrap()
    }

    fn payload() -> SignedPayload {
        SignedPayload {
            message: "msg".into(),
            signature: "sig".into(),
            client_public_key: "pk".into(),
        }
    }

    const MERCHANT: ConnectionId = ConnectionId::new(1);
    const CLIENT: ConnectionId = ConnectionId::new(2);
    const OTHER: ConnectionId = ConnectionId::new(3);

    #[tokio::test]
    async fn ids_are_unique() {
        let store = store();
        let ids: HashSet<_> = (0..500).map(|_| store.create(details(), MERCHANT)).collect();
        assert_eq!(ids.len(), 500);
        assert_eq!(store.len(), 500);
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        let snap = store.get(&id).unwrap();
        assert_eq!(snap.state, SessionState::Created);
        assert_eq!(snap.merchant, Some(MERCHANT));
        assert_eq!(snap.client, None);
        assert_eq!(snap.details.as_bytes(), DETAILS.as_bytes());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = store();
        let id = SessionId::from("nope");
        assert_eq!(store.get(&id).unwrap_err(), SessionError::NotFound(id.clone()));
        assert_eq!(
            store.mark_joined(&id, CLIENT).unwrap_err(),
            SessionError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn join_succeeds_exactly_once() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        let snap = store.mark_joined(&id, CLIENT).unwrap();
        assert_eq!(snap.state, SessionState::Joined);
        assert_eq!(snap.client, Some(CLIENT));
        assert_eq!(
            store.mark_joined(&id, OTHER).unwrap_err(),
            SessionError::AlreadyJoined
        );
        // First join still stands.
        assert_eq!(store.get(&id).unwrap().client, Some(CLIENT));
    }

    #[tokio::test(start_paused = true)]
    async fn unjoined_session_expires() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(store.get(&id).unwrap().state, SessionState::Expired);
        assert_eq!(
            store.mark_joined(&id, CLIENT).unwrap_err(),
            SessionError::Expired(id.clone())
        );
        assert_eq!(
            store.record_submission(&id, CLIENT, payload()).unwrap_err(),
            SessionError::Expired(id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn join_cancels_expiry() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        tokio::time::sleep(Duration::from_secs(30)).await;
        store.mark_joined(&id, CLIENT).unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.get(&id).unwrap().state, SessionState::Joined);
    }

    #[tokio::test]
    async fn mark_expired_is_idempotent_and_state_checked() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        assert!(store.mark_expired(&id));
        assert!(!store.mark_expired(&id));

        let joined = store.create(details(), MERCHANT);
        store.mark_joined(&joined, CLIENT).unwrap();
        assert!(!store.mark_expired(&joined));
        assert_eq!(store.get(&joined).unwrap().state, SessionState::Joined);

        assert!(!store.mark_expired(&SessionId::from("missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_tombstone_is_purged_after_retention() {
        let config = RelayConfig::default();
        let store = SessionStore::new(&config, EventBus::new());
        let id = store.create(details(), MERCHANT);

        tokio::time::sleep(config.session_timeout + Duration::from_secs(1)).await;
        assert_eq!(store.get(&id).unwrap().state, SessionState::Expired);

        tokio::time::sleep(config.retention).await;
        assert_eq!(store.get(&id).unwrap_err(), SessionError::NotFound(id));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn submission_requires_join() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        assert_eq!(
            store.record_submission(&id, CLIENT, payload()).unwrap_err(),
            SessionError::NotJoined
        );
    }

    #[tokio::test]
    async fn submission_only_from_bound_client() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        store.mark_joined(&id, CLIENT).unwrap();
        assert_eq!(
            store.record_submission(&id, OTHER, payload()).unwrap_err(),
            SessionError::NotBound
        );
        assert_eq!(
            store.record_submission(&id, MERCHANT, payload()).unwrap_err(),
            SessionError::NotBound
        );
    }

    #[tokio::test]
    async fn second_submission_is_duplicate() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        store.mark_joined(&id, CLIENT).unwrap();
        let snap = store.record_submission(&id, CLIENT, payload()).unwrap();
        assert_eq!(snap.state, SessionState::Submitted);
        assert_eq!(snap.signed_payload, Some(payload()));
        assert_eq!(
            store.record_submission(&id, CLIENT, payload()).unwrap_err(),
            SessionError::DuplicateSubmission
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_have_one_winner() {
        let store = store();
        let id = store.create(details(), MERCHANT);
        store.mark_joined(&id, CLIENT).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.record_submission(&id, CLIENT, payload()) })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e, SessionError::DuplicateSubmission),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn outcome_transitions() {
        let store = store();

        let ok = store.create(details(), MERCHANT);
        store.mark_joined(&ok, CLIENT).unwrap();
        store.record_submission(&ok, CLIENT, payload()).unwrap();
        let snap = store
            .record_outcome(
                &ok,
                SubmissionOutcome::Confirmed {
                    signature: "sig".into(),
                    explorer_url: "https://solscan.io/tx/sig".into(),
                },
            )
            .unwrap();
        assert_eq!(snap.state, SessionState::Finalized);

        let failed = store.create(details(), MERCHANT);
        store.mark_joined(&failed, CLIENT).unwrap();
        store.record_submission(&failed, CLIENT, payload()).unwrap();
        let snap = store
            .record_outcome(
                &failed,
                SubmissionOutcome::Failed {
                    code: "broadcastFailed".into(),
                    reason: "node unreachable".into(),
                },
            )
            .unwrap();
        assert_eq!(snap.state, SessionState::Submitted);
        assert!(snap.outcome.is_some());

        // Resubmission after a failure is still a duplicate.
        assert_eq!(
            store.record_submission(&failed, CLIENT, payload()).unwrap_err(),
            SessionError::DuplicateSubmission
        );
        // Outcomes are recorded once.
        assert_eq!(
            store
                .record_outcome(
                    &failed,
                    SubmissionOutcome::Failed {
                        code: "x".into(),
                        reason: "y".into()
                    }
                )
                .unwrap_err(),
            SessionError::SessionClosed
        );
    }

    #[tokio::test]
    async fn detach_clears_references() {
        let store = store();
        let a = store.create(details(), MERCHANT);
        let b = store.create(details(), MERCHANT);
        store.mark_joined(&a, CLIENT).unwrap();

        assert_eq!(store.detach_connection(MERCHANT), 2);
        assert_eq!(store.detach_connection(CLIENT), 1);
        assert_eq!(store.detach_connection(OTHER), 0);

        let snap = store.get(&a).unwrap();
        assert_eq!(snap.merchant, None);
        assert_eq!(snap.client, None);
        assert_eq!(snap.state, SessionState::Joined);
        assert_eq!(store.get(&b).unwrap().merchant, None);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_join_is_purged_after_retention() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let config = RelayConfig::default();
        let store = SessionStore::new(&config, bus);
        let id = store.create(details(), MERCHANT);
        store.mark_joined(&id, CLIENT).unwrap();

        store.detach_connection(CLIENT);
        store.detach_connection(MERCHANT);
        assert_eq!(
            store.mark_joined(&id, OTHER).unwrap_err(),
            SessionError::AlreadyJoined
        );

        tokio::time::sleep(config.retention + Duration::from_secs(1)).await;
        assert!(store.is_empty());
        assert_eq!(store.get(&id).unwrap_err(), SessionError::NotFound(id.clone()));

        let mut purged = false;
        while let Ok(event) = rx.try_recv() {
            purged |= event == RelayEvent::SessionPurged {
                session_id: id.clone(),
            };
        }
        assert!(purged);
    }

    #[tokio::test(start_paused = true)]
    async fn merchant_leaving_a_joined_session_keeps_it() {
        let config = RelayConfig::default();
        let store = SessionStore::new(&config, EventBus::new());
        let id = store.create(details(), MERCHANT);
        store.mark_joined(&id, CLIENT).unwrap();

        store.detach_connection(MERCHANT);
        tokio::time::sleep(config.retention + Duration::from_secs(1)).await;

        // The client can still submit.
        assert!(store.record_submission(&id, CLIENT, payload()).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn counts_by_state() {
        let store = store();
        let a = store.create(details(), MERCHANT);
        let b = store.create(details(), MERCHANT);
        let _c = store.create(details(), MERCHANT);
        store.mark_joined(&a, CLIENT).unwrap();
        store.mark_expired(&b);

        let counts = store.count_by_state();
        assert_eq!(counts.created, 1);
        assert_eq!(counts.joined, 1);
        assert_eq!(counts.expired, 1);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_publishes_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = SessionStore::new(&RelayConfig::default(), bus);
        let id = store.create(details(), MERCHANT);

        assert_eq!(
            rx.recv().await.unwrap(),
            RelayEvent::SessionCreated {
                session_id: id.clone()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RelayEvent::SessionExpired { session_id: id }
        );
    }
}
