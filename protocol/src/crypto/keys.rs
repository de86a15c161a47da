//! # Key Management
//!
//! Ed25519 keypairs, public keys and signatures as they travel through the
//! relay. Everything on the wire is base58, the same alphabet wallets use
//! for addresses, so a client can paste its public key straight from the
//! wallet UI.
//!
//! The relay itself owns exactly one secret: the fee-payer key. Client keys
//! only ever show up here as public halves.
//!
//! Key bytes are never logged. `Debug` on [`Keypair`] prints the public key
//! only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why* something failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key: expected 32 or 64 base58-encoded bytes")]
    InvalidSecretKey,

    #[error("invalid public key: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature: expected 64 base58-encoded bytes")]
    InvalidSignature,

    #[error("keypair validation failed: public key does not match secret key")]
    KeypairMismatch,
}

/// An Ed25519 signing keypair.
///
/// Intentionally not `Serialize`. Exporting a secret should be an explicit
/// call to [`Keypair::to_base58`], never a side effect of logging a struct.
pub struct Keypair {
    signing_key: SigningKey,
}

/// The public half of a keypair. Serialized as a base58 string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: [u8; 32],
}

/// A detached Ed25519 signature. Serialized as a base58 string.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 64],
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a base58 secret.
    ///
    /// Accepts either the bare 32-byte seed or the 64-byte `seed || pubkey`
    /// layout most wallets export. For the 64-byte form the embedded public
    /// key must match the one derived from the seed.
    pub fn from_base58(encoded: &str) -> Result<Self, KeyError> {
        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|_| KeyError::InvalidSecretKey)?;

        match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                Ok(Self::from_seed(&seed))
            }
            64 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes[..32]);
                let keypair = Self::from_seed(&seed);
                if keypair.public_key().as_bytes()[..] != bytes[32..] {
                    return Err(KeyError::KeypairMismatch);
                }
                Ok(keypair)
            }
            _ => Err(KeyError::InvalidSecretKey),
        }
    }

    /// Export the 64-byte `seed || pubkey` secret as base58.
    ///
    /// Handle with care. This is the only thing standing between an
    /// attacker and the fee-payer balance.
    pub fn to_base58(&self) -> String {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.signing_key.to_bytes());
        bytes[32..].copy_from_slice(self.public_key().as_bytes());
        bs58::encode(bytes).into_string()
    }

    /// The public key for this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message. Ed25519 is deterministic, so the same message always
    /// yields the same signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            bytes: self.signing_key.sign(message).to_bytes(),
        }
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(pub={})", self.public_key())
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    /// Build from raw bytes, rejecting bytes that are not a curve point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Parse a base58 public key.
    pub fn from_base58(encoded: &str) -> Result<Self, KeyError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(arr)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Base58 rendering.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.bytes).into_string()
    }

    /// Verify a detached signature over `message`.
    ///
    /// Uses strict verification: malleable and small-order edge cases are
    /// rejected rather than accepted.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let dalek_sig = DalekSignature::from_bytes(&signature.bytes);
        verifying_key.verify_strict(message, &dalek_sig).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base58())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

impl Signature {
    /// Build from raw bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Parse a base58 signature.
    pub fn from_base58(encoded: &str) -> Result<Self, KeyError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| KeyError::InvalidSignature)?;
        let arr: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self { bytes: arr })
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }

    /// Base58 rendering. This is also what explorers use as the
    /// transaction id when the signature is the fee payer's.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.bytes).into_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b58 = self.to_base58();
        write!(f, "Signature({}...)", &b58[..b58.len().min(12)])
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let msg = b"{\"amount\":1000000,\"merchantId\":\"7\"}";
        let sig = kp.sign(msg);
        assert!(kp.public_key().verify(msg, &sig));
        assert!(!kp.public_key().verify(b"tampered", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = Keypair::generate();
        let other = Keypair::generate();
        let sig = signer.sign(b"pay merchant 7");
        assert!(!other.public_key().verify(b"pay merchant 7", &sig));
    }

    #[test]
    fn secret_roundtrip_through_base58() {
        let kp = Keypair::generate();
        let exported = kp.to_base58();
        let restored = Keypair::from_base58(&exported).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn bare_seed_is_accepted() {
        let seed = [7u8; 32];
        let encoded = bs58::encode(seed).into_string();
        let kp = Keypair::from_base58(&encoded).unwrap();
        assert_eq!(kp.public_key(), Keypair::from_seed(&seed).public_key());
    }

    #[test]
    fn mismatched_secret_is_rejected() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut bytes = bs58::decode(a.to_base58()).into_vec().unwrap();
        bytes[32..].copy_from_slice(b.public_key().as_bytes());
        let tampered = bs58::encode(bytes).into_string();
        assert_eq!(
            Keypair::from_base58(&tampered).unwrap_err(),
            KeyError::KeypairMismatch
        );
    }

    #[test]
    fn garbage_inputs_are_rejected() {
        assert!(PublicKey::from_base58("not-base58-0OIl").is_err());
        assert!(PublicKey::from_base58("abc").is_err());
        assert!(Signature::from_base58("abc").is_err());
        assert!(Keypair::from_base58("abc").is_err());
    }

    #[test]
    fn debug_never_prints_secret() {
        let kp = Keypair::generate();
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&kp.to_base58()));
        assert!(debug.contains(&kp.public_key().to_base58()));
    }

    #[test]
    fn public_key_serde_is_base58_string() {
        let kp = Keypair::generate();
        let json = serde_json::to_string(&kp.public_key()).unwrap();
        assert_eq!(json, format!("\"{}\"", kp.public_key().to_base58()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kp.public_key());
    }
}
