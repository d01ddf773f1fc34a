//! Nostr event and protocol engine.
//!
//! Covers canonical event-ID hashing, BIP-340 Schnorr signatures, the NIP-44
//! v2 encryption used by seals and gift-wraps, the NIP-17/NIP-59 private
//! message onion, the legacy NIP-04 path, and the ephemeral geohash events.
//!
//! Everything here is synchronous and pure; network delivery belongs to the
//! relay multiplexer.

mod event;
mod giftwrap;
pub mod nip04;
pub mod nip44;

pub use event::{
    build_geohash_note, build_presence, sign_event, verify_event, Event,
};
pub use giftwrap::{create_private_message, decrypt_private_message};

use crate::error::{Error, Result};
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use std::fmt;

/// Recognized event kinds.
pub mod kind {
    /// Profile metadata.
    pub const METADATA: u16 = 0;
    /// Public text note.
    pub const TEXT_NOTE: u16 = 1;
    /// NIP-04 legacy encrypted direct message.
    pub const LEGACY_DM: u16 = 4;
    /// NIP-17 seal wrapping a rumor.
    pub const SEAL: u16 = 13;
    /// NIP-17 rumor; never published on the wire.
    pub const RUMOR: u16 = 14;
    /// NIP-59 gift-wrap hiding the sender identity.
    pub const GIFT_WRAP: u16 = 1059;
    /// Ephemeral geohash-scoped chat note.
    pub const GEOHASH_NOTE: u16 = 20000;
    /// Ephemeral geohash presence beacon.
    pub const GEOHASH_PRESENCE: u16 = 20001;
}

/// How far seal and gift-wrap timestamps are smeared, in seconds.
pub const TIMESTAMP_JITTER_SECS: i64 = 900;

/// A decrypted NIP-17 private message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// Plaintext content of the rumor.
    pub content: String,
    /// Hex pubkey of the attested sender.
    pub sender_pubkey: String,
    /// The rumor's real (un-jittered) timestamp.
    pub timestamp: i64,
}

/// A secp256k1 identity keypair for Nostr signing and ECDH.
pub struct NostrKeypair {
    secret: SecretKey,
    keypair: Keypair,
    public_hex: String,
}

impl NostrKeypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::rngs::OsRng);
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
        Self {
            secret,
            keypair,
            public_hex: hex::encode(xonly.serialize()),
        }
    }

    /// Restore from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
        Ok(Self {
            secret,
            keypair,
            public_hex: hex::encode(xonly.serialize()),
        })
    }

    /// Restore from a hex-encoded secret scalar.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(secret_hex)
            .map_err(|e| Error::InvalidKey(e.to_string()))?
            .try_into()
            .map_err(|_| Error::InvalidKey("secret key must be 32 bytes".into()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// The x-only public key as lowercase hex.
    pub fn public_key_hex(&self) -> &str {
        &self.public_hex
    }

    /// Export the secret scalar for keystore persistence.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub(crate) fn secp_keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl fmt::Debug for NostrKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NostrKeypair")
            .field("public", &self.public_hex)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A timestamp smeared uniformly within ±[`TIMESTAMP_JITTER_SECS`] of now.
///
/// Applied to seals and gift-wraps so relay logs cannot correlate wrap times
/// with message times. Rumors keep their real timestamp.
pub fn randomized_timestamp() -> i64 {
    use rand::Rng;
    let jitter = rand::rngs::OsRng.gen_range(-TIMESTAMP_JITTER_SECS..=TIMESTAMP_JITTER_SECS);
    unix_now().saturating_add(jitter)
}
