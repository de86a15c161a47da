//! # Sessions
//!
//! A session pairs one merchant connection with one client connection
//! around a single payment intent. This module owns the session entity, the
//! store that holds every live session, and the one-shot timers that expire
//! sessions nobody joined.
//!
//! ## Lifecycle
//!
//! 1. `create`: merchant supplies transaction details; the session starts
//!    in `Created` with an expiry timer armed.
//! 2. `mark_joined`: first client wins; the timer is cancelled.
//! 3. `record_submission`: the bound client's signed payload is stored
//!    exactly once.
//! 4. `record_outcome`: the submission result finalizes the session (or
//!    records the failure).
//!
//! Expired and finished sessions linger as tombstones for the configured
//! retention window so late requests get a precise answer, then vanish.

pub mod error;
pub mod expiry;
pub mod store;
pub mod types;

pub use error::SessionError;
pub use expiry::{ExpiryHandle, ExpiryScheduler};
pub use store::{SessionStore, StateCounts};
pub use types::{
    ConnectionId, DetailsView, Role, SessionId, SessionSnapshot, SessionState,
    SubmissionOutcome, TransactionDetails,
};
