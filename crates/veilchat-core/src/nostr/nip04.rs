//! NIP-04 legacy encrypted direct messages (AES-256-CBC).
//!
//! Kept for interoperability with old clients. The key is the raw ECDH
//! x-coordinate, the content format is
//! `base64(ciphertext) + "?iv=" + base64(iv)`, and the scheme offers no
//! authentication — prefer NIP-44 and gift-wraps for anything new.

use crate::crypto::random_bytes;
use crate::error::{Error, Result};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secp256k1::{ecdh::shared_secret_point, Parity, PublicKey, SecretKey, XOnlyPublicKey};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_SIZE: usize = 16;

/// Encrypt a legacy DM body for an x-only recipient pubkey.
pub fn encrypt(plaintext: &str, recipient_pub_hex: &str, sender_secret: &SecretKey) -> Result<String> {
    let key = shared_key(sender_secret, recipient_pub_hex)?;
    let iv: [u8; IV_SIZE] = random_bytes();

    let ciphertext = Aes256CbcEnc::new((&*key).into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!(
        "{}?iv={}",
        BASE64.encode(ciphertext),
        BASE64.encode(iv)
    ))
}

/// Decrypt a legacy DM body from an x-only sender pubkey.
///
/// Both the ciphertext and `iv=` fields are required; they may appear in
/// either order around the `?` separator.
pub fn decrypt(content: &str, sender_pub_hex: &str, recipient_secret: &SecretKey) -> Result<String> {
    let (ct_b64, iv_b64) = split_fields(content)?;

    let ciphertext = BASE64
        .decode(ct_b64.trim())
        .map_err(|_| Error::InvalidCiphertext)?;
    let iv: [u8; IV_SIZE] = BASE64
        .decode(iv_b64.trim())
        .map_err(|_| Error::InvalidCiphertext)?
        .try_into()
        .map_err(|_| Error::InvalidCiphertext)?;

    let key = shared_key(recipient_secret, sender_pub_hex)?;
    let plaintext = Aes256CbcDec::new((&*key).into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| Error::InvalidCiphertext)?;

    String::from_utf8(plaintext).map_err(|e| Error::Encoding(e.to_string()))
}

/// Split the `ciphertext?iv=...` content, tolerating swapped field order.
fn split_fields(content: &str) -> Result<(&str, &str)> {
    let mut parts = content.splitn(2, '?');
    let first = parts.next().unwrap_or_default();
    let second = parts
        .next()
        .ok_or_else(|| Error::InvalidMessage("missing iv field".into()))?;

    if let Some(iv) = second.strip_prefix("iv=") {
        Ok((first, iv))
    } else if let Some(iv) = first.strip_prefix("iv=") {
        Ok((second, iv))
    } else {
        Err(Error::InvalidMessage("missing iv field".into()))
    }
}

/// Raw ECDH x-coordinate shared between the two keys.
fn shared_key(secret: &SecretKey, peer_pub_hex: &str) -> Result<Zeroizing<[u8; 32]>> {
    let bytes = hex::decode(peer_pub_hex).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let xonly =
        XOnlyPublicKey::from_slice(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let point = PublicKey::from_x_only_public_key(xonly, Parity::Even);

    let shared = shared_secret_point(&point, secret);
    Ok(Zeroizing::new({
        let mut key = [0u8; 32];
        key.copy_from_slice(&shared[..32]);
        key
    }))
}
