//! SHA-256 helpers.
//!
//! Used to fingerprint transaction details in logs without printing the
//! details themselves.

use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Short hex fingerprint (first 8 bytes of SHA-256). Good enough to
/// correlate log lines, useless for anything security-related.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(&sha256(data)[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = fingerprint(b"{\"amount\":1}");
        assert_eq!(a.len(), 16);
        assert_eq!(a, fingerprint(b"{\"amount\":1}"));
        assert_ne!(a, fingerprint(b"{\"amount\":2}"));
    }
}
