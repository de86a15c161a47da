//! # Detached Signatures
//!
//! Verification of the signatures clients attach to their payloads.
//! Everything arrives off the wire as base58 strings, so the functions here
//! take strings and do the parsing themselves.
//!
//! Failures are intentionally coarse. A caller learns *that* verification
//! failed, plus whether the input was even well-formed, and nothing else.

use thiserror::Error;

use super::keys::{Keypair, PublicKey, Signature};

/// Errors during signature operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Sign a message with the given keypair.
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verify a typed signature.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// Verify a signature given as base58 strings straight off the wire.
pub fn verify_base58(
    public_key_b58: &str,
    message: &[u8],
    signature_b58: &str,
) -> Result<(), SignatureError> {
    let public_key =
        PublicKey::from_base58(public_key_b58).map_err(|_| SignatureError::InvalidPublicKey)?;
    let signature = Signature::from_base58(signature_b58)
        .map_err(|_| SignatureError::InvalidSignatureEncoding)?;

    if public_key.verify(message, &signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}
