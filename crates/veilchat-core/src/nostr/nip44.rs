//! NIP-44 v2 authenticated encryption.
//!
//! Key agreement is secp256k1 ECDH between the sender's scalar and the
//! recipient's x-only pubkey; the shared x-coordinate feeds
//! HKDF-SHA256(info = "nip44-v2") to produce the message key. The payload is
//! XChaCha20-Poly1305 with a random 24-byte nonce, framed as
//! `"v2:" + base64url_nopad(nonce || ciphertext || tag)`.
//!
//! X-only pubkeys drop the curve point's parity. Encryption always lifts the
//! peer key with even parity; decryption tries even first and falls back to
//! odd, because peers that derived their key from a BIP-340 keypair may sit
//! on the odd-parity point. Failure surfaces only after both parities miss.

use crate::crypto::hkdf_derive;
use crate::crypto::random_bytes;
use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use secp256k1::{ecdh::shared_secret_point, Parity, PublicKey, SecretKey, XOnlyPublicKey};
use zeroize::Zeroizing;

/// Version prefix on every payload.
const VERSION_PREFIX: &str = "v2:";

/// XChaCha20 nonce size in bytes.
const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
const TAG_SIZE: usize = 16;

/// HKDF info string binding keys to this scheme.
const KDF_INFO: &[u8] = b"nip44-v2";

/// Encrypt a message to an x-only recipient pubkey.
pub fn encrypt(plaintext: &str, recipient_pub_hex: &str, sender_secret: &SecretKey) -> Result<String> {
    let recipient = parse_xonly(recipient_pub_hex)?;
    let key = message_key(sender_secret, &recipient, Parity::Even)?;

    let nonce: [u8; NONCE_SIZE] = random_bytes();
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_bytes(),
                aad: b"",
            },
        )
        .map_err(|_| Error::InvalidCiphertext)?;

    let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);
    Ok(format!("{}{}", VERSION_PREFIX, URL_SAFE_NO_PAD.encode(framed)))
}

/// Decrypt a payload from an x-only sender pubkey.
pub fn decrypt(payload: &str, sender_pub_hex: &str, recipient_secret: &SecretKey) -> Result<String> {
    let encoded = payload
        .strip_prefix(VERSION_PREFIX)
        .ok_or(Error::InvalidCiphertext)?;
    let data = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::InvalidCiphertext)?;
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::InvalidCiphertext);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

    let sender = parse_xonly(sender_pub_hex)?;
    for parity in [Parity::Even, Parity::Odd] {
        let key = message_key(recipient_secret, &sender, parity)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        if let Ok(plaintext) = cipher.decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: b"",
            },
        ) {
            return String::from_utf8(plaintext).map_err(|e| Error::Encoding(e.to_string()));
        }
    }
    Err(Error::InvalidCiphertext)
}

/// Derive the symmetric message key for one (secret, peer, parity) triple.
fn message_key(
    secret: &SecretKey,
    peer: &XOnlyPublicKey,
    parity: Parity,
) -> Result<Zeroizing<[u8; 32]>> {
    let point = PublicKey::from_x_only_public_key(*peer, parity);
    let shared = shared_secret_point(&point, secret);
    let shared_x = Zeroizing::new({
        let mut x = [0u8; 32];
        x.copy_from_slice(&shared[..32]);
        x
    });

    let derived = hkdf_derive(None, &*shared_x, KDF_INFO, 32)?;
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&derived);
    Ok(key)
}

fn parse_xonly(pub_hex: &str) -> Result<XOnlyPublicKey> {
    let bytes = hex::decode(pub_hex).map_err(|e| Error::InvalidKey(e.to_string()))?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))
}
