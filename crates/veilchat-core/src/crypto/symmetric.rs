//! Symmetric handshake state: chaining key, transcript hash and the
//! handshake-phase cipher.
//!
//! Follows the Noise `SymmetricState` object: `mix_hash` binds every byte on
//! the wire into the transcript, `mix_key` ratchets the chaining key through
//! HKDF on each Diffie-Hellman result, and `split` derives the two transport
//! ciphers and destroys the handshake material.

use crate::crypto::cipher::{CipherState, KEY_SIZE};
use crate::error::Result;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Symmetric state for an in-progress handshake.
pub struct SymmetricState {
    chaining_key: [u8; KEY_SIZE],
    hash: [u8; KEY_SIZE],
    cipher: CipherState,
}

impl SymmetricState {
    /// Initialize from a protocol name such as
    /// `Noise_XX_25519_ChaChaPoly_SHA256`.
    ///
    /// Names of 32 bytes or fewer are zero-padded into the initial hash;
    /// longer names are hashed.
    pub fn new(protocol_name: &str) -> Self {
        let name = protocol_name.as_bytes();
        let hash: [u8; KEY_SIZE] = if name.len() <= KEY_SIZE {
            let mut padded = [0u8; KEY_SIZE];
            padded[..name.len()].copy_from_slice(name);
            padded
        } else {
            Sha256::digest(name).into()
        };

        Self {
            chaining_key: hash,
            hash,
            cipher: CipherState::new(false),
        }
    }

    /// Absorb data into the transcript hash.
    pub fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    /// Ratchet the chaining key with new input key material and key the
    /// handshake cipher with the second HKDF output.
    pub fn mix_key(&mut self, input_key_material: &[u8]) {
        let mut output = [0u8; KEY_SIZE * 2];
        hkdf_expand(&self.chaining_key, input_key_material, &mut output);

        self.chaining_key.copy_from_slice(&output[..KEY_SIZE]);
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&output[KEY_SIZE..]);
        self.cipher.initialize_key(key);

        output.zeroize();
        key.zeroize();
    }

    /// Three-output variant that additionally folds the second output into
    /// the transcript hash. Used for pre-shared-key style mixing.
    pub fn mix_key_and_hash(&mut self, input_key_material: &[u8]) {
        let mut output = [0u8; KEY_SIZE * 3];
        hkdf_expand(&self.chaining_key, input_key_material, &mut output);

        self.chaining_key.copy_from_slice(&output[..KEY_SIZE]);
        let hash_input: [u8; KEY_SIZE] = {
            let mut tmp = [0u8; KEY_SIZE];
            tmp.copy_from_slice(&output[KEY_SIZE..KEY_SIZE * 2]);
            tmp
        };
        self.mix_hash(&hash_input);
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&output[KEY_SIZE * 2..]);
        self.cipher.initialize_key(key);

        output.zeroize();
        key.zeroize();
    }

    /// Encrypt a handshake payload (or pass it through before any key is
    /// established) and absorb the result into the transcript.
    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.cipher.has_key() {
            let hash = self.hash;
            let ciphertext = self.cipher.encrypt(plaintext, &hash)?;
            self.mix_hash(&ciphertext);
            Ok(ciphertext)
        } else {
            self.mix_hash(plaintext);
            Ok(plaintext.to_vec())
        }
    }

    /// Dual of [`SymmetricState::encrypt_and_hash`]. The *ciphertext* is
    /// mixed into the transcript, matching the sender's view.
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if self.cipher.has_key() {
            let hash = self.hash;
            let plaintext = self.cipher.decrypt(ciphertext, &hash)?;
            self.mix_hash(ciphertext);
            Ok(plaintext)
        } else {
            self.mix_hash(ciphertext);
            Ok(ciphertext.to_vec())
        }
    }

    /// Whether the handshake cipher has been keyed yet. Determines the wire
    /// size of encrypted static keys.
    pub fn cipher_has_key(&self) -> bool {
        self.cipher.has_key()
    }

    /// Derive the two transport cipher states and destroy this state.
    ///
    /// The first cipher belongs to the initiator's sending direction.
    pub fn split(mut self, use_extracted_nonce: bool) -> (CipherState, CipherState) {
        let mut output = [0u8; KEY_SIZE * 2];
        hkdf_expand(&self.chaining_key, &[], &mut output);

        let mut k1 = [0u8; KEY_SIZE];
        let mut k2 = [0u8; KEY_SIZE];
        k1.copy_from_slice(&output[..KEY_SIZE]);
        k2.copy_from_slice(&output[KEY_SIZE..]);

        let c1 = CipherState::with_key(k1, use_extracted_nonce);
        let c2 = CipherState::with_key(k2, use_extracted_nonce);

        output.zeroize();
        k1.zeroize();
        k2.zeroize();
        self.chaining_key.zeroize();
        self.hash.zeroize();
        self.cipher.clear();

        (c1, c2)
    }

    /// Current transcript hash, used for channel binding.
    pub fn handshake_hash(&self) -> [u8; KEY_SIZE] {
        self.hash
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.chaining_key.zeroize();
        self.hash.zeroize();
    }
}

impl std::fmt::Debug for SymmetricState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricState")
            .field("cipher_keyed", &self.cipher.has_key())
            .finish()
    }
}

/// RFC 5869 HKDF-SHA256 with the chaining key as salt and empty info,
/// expanded to the caller's buffer length.
fn hkdf_expand(chaining_key: &[u8; KEY_SIZE], input_key_material: &[u8], output: &mut [u8]) {
    let hkdf = Hkdf::<Sha256>::new(Some(chaining_key), input_key_material);
    // Only called with 64- or 96-byte outputs, both far below the HKDF limit.
    #[allow(clippy::expect_used)]
    hkdf.expand(&[], output)
        .expect("HKDF output length within bounds");
}
