//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around `ed25519-dalek` and `sha2`. The relay never
//! invents its own crypto. It needs exactly three things:
//!
//! - **Ed25519** signatures, for client payloads and fee-payer co-signing.
//! - **base58** encoding, because that's what wallets put on the wire.
//! - **SHA-256** fingerprints, to correlate log lines without leaking data.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{fingerprint, sha256};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
pub use signatures::{sign, verify, verify_base58, SignatureError};
