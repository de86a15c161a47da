//! # Relay
//!
//! The real-time half of the system: connections, wire envelopes and the
//! per-session state machine that pairs a merchant with a client.
//!
//! - [`envelope`]: parse inbound frames, render outbound ones.
//! - [`router`]: connection ids and per-connection outbound queues.
//! - [`machine`]: [`RelayProtocol`], which dispatches actions and fans out
//!   results.
//! - [`error`]: the rejection taxonomy and its close-code policy.

pub mod envelope;
pub mod error;
pub mod machine;
pub mod router;

pub use envelope::{Action, RawEnvelope, Request, ServerMessage, UNKNOWN_ACTION};
pub use error::RelayError;
pub use machine::{RelayProtocol, SUBMISSION_FAILED, TRANSACTION_FAILED};
pub use router::{ConnectionRouter, Outbound};
