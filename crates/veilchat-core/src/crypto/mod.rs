//! Cryptographic core: Noise protocol state machines and shared primitives.
//!
//! All cryptography uses well-audited primitives:
//!
//! - **X25519**: Diffie-Hellman key exchange
//! - **ChaCha20-Poly1305**: authenticated encryption (AEAD)
//! - **HKDF-SHA256**: key derivation
//! - **Noise XX/IK/NK**: handshake patterns producing forward-secure channels
//!
//! Everything in this module is synchronous and pure: state machines over
//! explicit structs, no I/O, no suspension. Secret material is zeroized on
//! drop, close and split.

mod cipher;
mod handshake;
mod keys;
mod session;
mod symmetric;

pub use cipher::{CipherState, ReplayWindow, KEY_SIZE, NONCE_PREFIX_SIZE, REPLAY_WINDOW_BITS, TAG_SIZE};
pub use handshake::{HandshakePattern, HandshakeState, Role, TransportKeys};
pub use keys::{EphemeralKeypair, SharedSecret, StaticKeypair, X25519PublicKey, X25519_KEY_SIZE};
pub use session::{NoiseSession, SessionStatus};
pub use symmetric::SymmetricState;

use crate::error::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Derive keys using HKDF-SHA256 (RFC 5869).
pub fn hkdf_derive(
    salt: Option<&[u8]>,
    input_key_material: &[u8],
    info: &[u8],
    output_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_length]);
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::InvalidKey("HKDF expansion failed".into()))?;
    Ok(output)
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Constant-time comparison of byte slices.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_derive() {
        let out1 = hkdf_derive(Some(b"salt"), b"ikm", b"info", 32).expect("derive");
        let out2 = hkdf_derive(Some(b"salt"), b"ikm", b"info", 32).expect("derive");
        assert_eq!(&*out1, &*out2);

        let out3 = hkdf_derive(Some(b"salt"), b"ikm", b"other", 32).expect("derive");
        assert_ne!(&*out1, &*out3);
    }

    #[test]
    fn test_random_bytes() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hi"));
    }
}
