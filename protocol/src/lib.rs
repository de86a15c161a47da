// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # MAPP Relay Core Library
//!
//! Gasless payments need a third party: someone has to pay the network fee
//! when the customer's wallet holds only USDC. This crate is that third
//! party. It pairs a merchant's point of sale with a customer's wallet over
//! two independent real-time connections, hands the customer the exact
//! payment intent the merchant proposed, and once the customer signs it,
//! co-signs as fee payer and broadcasts. It never holds customer funds.
//!
//! ## Architecture
//!
//! - **session**: session entity, store and expiry timers. The only shared
//!   mutable state in the process.
//! - **relay**: wire envelopes, connection router and the state machine
//!   that moves a session from `Created` to `Finalized`.
//! - **submission**: co-sign, broadcast with retries, wait for confirmation.
//! - **ledger**: the `LedgerClient` seam, with a local devnet ledger and a
//!   JSON-RPC client.
//! - **pricing**: ARS ⇄ USDC conversion against a live rate feed.
//! - **qr**: payment QR codes for the merchant's screen.
//! - **crypto**: Ed25519 keys and signatures, base58, SHA-256.
//! - **events**: lifecycle events for metrics and tests.
//! - **config**: every constant and tunable.
//!
//! ## Design Philosophy
//!
//! 1. One lock per session. Races between a join and an expiry, or two
//!    submissions, have exactly one winner.
//! 2. What the merchant sent is what the client signs, byte for byte.
//! 3. A broken connection can only hurt itself.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod events;
pub mod ledger;
pub mod pricing;
pub mod qr;
pub mod relay;
pub mod session;
pub mod submission;

pub use config::RelayConfig;
pub use events::{EventBus, RelayEvent};
pub use ledger::{LedgerClient, LocalLedger, RpcLedger, SignedPayload};
pub use relay::{Outbound, RelayProtocol};
pub use session::{ConnectionId, SessionId, SessionState};
