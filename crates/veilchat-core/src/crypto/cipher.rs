//! Transport cipher state: ChaCha20-Poly1305 with a counter nonce and
//! sliding-window replay detection.
//!
//! Two decrypt modes exist. In counter-synchronous mode both sides advance a
//! shared counter implicitly, so records must arrive in order. In
//! extracted-nonce mode each record carries its counter as a big-endian u32
//! prefix and a 1024-bit window accepts records out of order while rejecting
//! duplicates and records older than the window.
//!
//! Wire conventions: the AEAD nonce places the u64 counter little-endian in
//! the last 8 of 12 bytes, while the wire prefix is the same counter as a
//! big-endian u32. Both are load-bearing for interoperability.

use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use zeroize::Zeroize;

/// Size of cipher keys in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the wire nonce prefix in extracted-nonce mode.
pub const NONCE_PREFIX_SIZE: usize = 4;

/// Width of the replay window in bits.
pub const REPLAY_WINDOW_BITS: usize = 1024;

const WINDOW_WORDS: usize = REPLAY_WINDOW_BITS / 64;

/// Highest nonce value a cipher will emit before demanding a rekey.
const MAX_NONCE: u64 = u32::MAX as u64;

/// Sliding window tracking which transport nonces have been received.
///
/// Bit `i` of the bitmap corresponds to nonce `highest - i`. Nonces at or
/// below `highest - REPLAY_WINDOW_BITS` are rejected outright.
#[derive(Clone)]
pub struct ReplayWindow {
    highest: u64,
    bitmap: [u64; WINDOW_WORDS],
}

impl ReplayWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self {
            highest: 0,
            bitmap: [0; WINDOW_WORDS],
        }
    }

    /// Check whether a received nonce is acceptable.
    ///
    /// Does not update the window; call [`ReplayWindow::accept`] only after
    /// the record authenticates, so forged packets cannot burn window slots.
    pub fn check(&self, counter: u64) -> Result<()> {
        if counter > self.highest {
            return Ok(());
        }
        let diff = self.highest - counter;
        if diff as usize >= REPLAY_WINDOW_BITS {
            return Err(Error::ReplayDetected);
        }
        let word = (diff as usize) / 64;
        let bit = (diff as usize) % 64;
        if self.bitmap[word] & (1u64 << bit) != 0 {
            return Err(Error::ReplayDetected);
        }
        Ok(())
    }

    /// Record a nonce as seen, advancing the window if it is a new highest.
    pub fn accept(&mut self, counter: u64) {
        if counter > self.highest {
            let shift = counter - self.highest;
            if shift as usize >= REPLAY_WINDOW_BITS {
                self.bitmap = [0; WINDOW_WORDS];
            } else {
                self.shift_bitmap(shift as usize);
            }
            self.highest = counter;
            self.bitmap[0] |= 1;
        } else {
            let diff = self.highest - counter;
            let word = (diff as usize) / 64;
            let bit = (diff as usize) % 64;
            self.bitmap[word] |= 1u64 << bit;
        }
    }

    /// Move existing entries to higher offsets to make room for a new
    /// highest nonce at bit 0.
    fn shift_bitmap(&mut self, shift: usize) {
        let word_shift = shift / 64;
        let bit_shift = shift % 64;

        if word_shift > 0 {
            for i in (word_shift..WINDOW_WORDS).rev() {
                self.bitmap[i] = self.bitmap[i - word_shift];
            }
            for slot in self.bitmap.iter_mut().take(word_shift) {
                *slot = 0;
            }
        }

        if bit_shift > 0 {
            let mut carry = 0u64;
            for word in self.bitmap.iter_mut() {
                let next_carry = *word >> (64 - bit_shift);
                *word = (*word << bit_shift) | carry;
                carry = next_carry;
            }
        }
    }

    /// Highest nonce seen so far.
    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Zeroize the window.
    pub fn clear(&mut self) {
        self.highest = 0;
        self.bitmap.zeroize();
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplayWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayWindow")
            .field("highest", &self.highest)
            .field("bits", &REPLAY_WINDOW_BITS)
            .finish()
    }
}

/// AEAD cipher state with a monotonic nonce counter.
///
/// One instance encrypts one direction of a channel; its twin (from the same
/// `Split`) decrypts it on the other side.
pub struct CipherState {
    key: Option<[u8; KEY_SIZE]>,
    counter: u64,
    replay: ReplayWindow,
    extracted_nonce: bool,
}

impl CipherState {
    /// Create a cipher with no key yet.
    pub fn new(extracted_nonce: bool) -> Self {
        Self {
            key: None,
            counter: 0,
            replay: ReplayWindow::new(),
            extracted_nonce,
        }
    }

    /// Create a cipher seeded with a key.
    pub(crate) fn with_key(key: [u8; KEY_SIZE], extracted_nonce: bool) -> Self {
        let mut state = Self::new(extracted_nonce);
        state.initialize_key(key);
        state
    }

    /// Install a key and reset the send counter. The replay window is left
    /// untouched.
    pub fn initialize_key(&mut self, key: [u8; KEY_SIZE]) {
        if let Some(ref mut old) = self.key {
            old.zeroize();
        }
        self.key = Some(key);
        self.counter = 0;
    }

    /// Whether a key has been installed.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Whether records carry their own nonce prefix.
    pub fn uses_extracted_nonce(&self) -> bool {
        self.extracted_nonce
    }

    /// Encrypt a record under the current counter.
    ///
    /// In extracted-nonce mode the output is `counter_be_u32 || ciphertext ||
    /// tag`; otherwise `ciphertext || tag`. Fails with
    /// [`Error::NonceExceeded`] once the counter space is spent.
    pub fn encrypt(&mut self, plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_ref().ok_or(Error::UninitializedCipher)?;
        if self.counter > MAX_NONCE {
            return Err(Error::NonceExceeded);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = counter_nonce(self.counter);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| Error::InvalidCiphertext)?;

        let out = if self.extracted_nonce {
            let mut framed = Vec::with_capacity(NONCE_PREFIX_SIZE + ciphertext.len());
            framed.extend_from_slice(&(self.counter as u32).to_be_bytes());
            framed.extend_from_slice(&ciphertext);
            framed
        } else {
            ciphertext
        };

        self.counter += 1;
        Ok(out)
    }

    /// Decrypt a record.
    ///
    /// Counter-synchronous mode uses the internal counter and advances it on
    /// success. Extracted-nonce mode reads the big-endian u32 prefix, checks
    /// it against the replay window, and marks it only after the tag
    /// authenticates.
    pub fn decrypt(&mut self, ciphertext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_ref().ok_or(Error::UninitializedCipher)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

        if self.extracted_nonce {
            if ciphertext.len() < NONCE_PREFIX_SIZE + TAG_SIZE {
                return Err(Error::InvalidCiphertext);
            }
            let mut prefix = [0u8; NONCE_PREFIX_SIZE];
            prefix.copy_from_slice(&ciphertext[..NONCE_PREFIX_SIZE]);
            let received = u32::from_be_bytes(prefix) as u64;

            self.replay.check(received)?;

            let nonce = counter_nonce(received);
            let plaintext = cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext[NONCE_PREFIX_SIZE..],
                        aad: associated_data,
                    },
                )
                .map_err(|_| Error::InvalidCiphertext)?;

            self.replay.accept(received);
            Ok(plaintext)
        } else {
            if ciphertext.len() < TAG_SIZE {
                return Err(Error::InvalidCiphertext);
            }
            let nonce = counter_nonce(self.counter);
            let plaintext = cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: ciphertext,
                        aad: associated_data,
                    },
                )
                .map_err(|_| Error::InvalidCiphertext)?;

            self.counter += 1;
            Ok(plaintext)
        }
    }

    /// Zeroize key, counter and replay window.
    pub fn clear(&mut self) {
        if let Some(ref mut key) = self.key {
            key.zeroize();
        }
        self.key = None;
        self.counter = 0;
        self.replay.clear();
    }

    #[cfg(test)]
    fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState")
            .field("has_key", &self.key.is_some())
            .field("counter", &self.counter)
            .field("extracted_nonce", &self.extracted_nonce)
            .finish()
    }
}

/// Form the 12-byte AEAD nonce: 4 zero bytes, then the counter little-endian.
fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}
