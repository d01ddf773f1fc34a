//! Error types for the VeilChat core.
//!
//! Variants are grouped by recovery policy: protocol violations terminate the
//! session, state-misuse errors surface caller bugs, replay is dropped at the
//! transport layer, and transport faults are retried with backoff.

use thiserror::Error;

/// Core error type for VeilChat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A handshake or transport message was malformed (short read, bad
    /// framing). The peer sent something unusable; the session is dead.
    #[error("invalid message")]
    InvalidMessage(String),

    /// Ciphertext failed authentication or had an impossible length.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// A received public key was rejected (wrong length or low-order point).
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Decryption of an encrypted static key failed during the handshake.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// A handshake operation was invoked after completion.
    #[error("handshake already complete")]
    HandshakeComplete,

    /// A transport operation was invoked before the handshake finished.
    #[error("handshake not complete")]
    HandshakeNotComplete,

    /// Encrypt/decrypt was called on a cipher that has no key yet.
    #[error("cipher not initialized")]
    UninitializedCipher,

    /// The selected pattern requires a remote static key that was not given.
    #[error("missing remote static key")]
    MissingKeys,

    /// The selected pattern requires a local static key that was not given.
    #[error("missing local static key")]
    MissingLocalStaticKey,

    /// The nonce counter reached its limit; the session must be rekeyed.
    #[error("nonce counter exhausted")]
    NonceExceeded,

    /// A transport nonce was already seen or fell behind the replay window.
    /// The record is dropped; the session stays up.
    #[error("replay detected")]
    ReplayDetected,

    /// The session was closed and can no longer encrypt or decrypt.
    #[error("session closed")]
    SessionClosed,

    /// Key material was structurally invalid (bad hex, wrong length, not a
    /// valid scalar).
    #[error("invalid key material")]
    InvalidKey(String),

    /// Encoding or decoding failed (bech32, base64, JSON, UTF-8).
    #[error("encoding error")]
    Encoding(String),

    /// Keystore I/O or sealing failed.
    #[error("keystore error")]
    Keystore(String),

    /// Relay multiplexer failure (bad URL, send on a torn-down pool).
    #[error("relay error")]
    Relay(String),

    /// No relay connection is currently open.
    #[error("not connected")]
    NotConnected,
}

/// Result type alias using VeilChat's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Keystore(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
