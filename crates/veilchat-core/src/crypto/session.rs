//! Session facade over the handshake and transport phases.
//!
//! A [`NoiseSession`] walks through `Handshaking → Established → Closed`.
//! During the first phase it forwards to the handshake state machine and
//! finalizes automatically when the pattern completes; afterwards it owns the
//! two transport ciphers. `close` is idempotent and zeroizes everything.

use crate::crypto::cipher::CipherState;
use crate::crypto::handshake::{HandshakePattern, HandshakeState, Role};
use crate::crypto::keys::{StaticKeypair, X25519PublicKey};
use crate::error::{Error, Result};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Handshake messages are still being exchanged.
    Handshaking,
    /// Transport ciphers are installed; encrypt/decrypt are live.
    Established,
    /// All material has been zeroized; the session is unusable.
    Closed,
}

/// An end-to-end encrypted session with one peer.
pub struct NoiseSession {
    status: SessionStatus,
    handshake: Option<HandshakeState>,
    send: Option<CipherState>,
    recv: Option<CipherState>,
    handshake_hash: Option<[u8; 32]>,
    remote_static: Option<X25519PublicKey>,
    use_extracted_nonce: bool,
}

impl NoiseSession {
    /// Start a session as the handshake initiator.
    pub fn initiator(
        pattern: HandshakePattern,
        prologue: &[u8],
        local_static: Option<StaticKeypair>,
        remote_static: Option<X25519PublicKey>,
        use_extracted_nonce: bool,
    ) -> Result<Self> {
        let handshake =
            HandshakeState::new(Role::Initiator, pattern, prologue, local_static, remote_static)?;
        Ok(Self::from_handshake(handshake, use_extracted_nonce))
    }

    /// Start a session as the handshake responder.
    pub fn responder(
        pattern: HandshakePattern,
        prologue: &[u8],
        local_static: Option<StaticKeypair>,
        use_extracted_nonce: bool,
    ) -> Result<Self> {
        let handshake = HandshakeState::new(Role::Responder, pattern, prologue, local_static, None)?;
        Ok(Self::from_handshake(handshake, use_extracted_nonce))
    }

    fn from_handshake(handshake: HandshakeState, use_extracted_nonce: bool) -> Self {
        Self {
            status: SessionStatus::Handshaking,
            handshake: Some(handshake),
            send: None,
            recv: None,
            handshake_hash: None,
            remote_static: None,
            use_extracted_nonce,
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Whether transport encryption is available.
    pub fn is_established(&self) -> bool {
        self.status == SessionStatus::Established
    }

    /// Write the next handshake message. Finalizes the session when the
    /// pattern completes.
    pub fn write_handshake_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let handshake = self.handshake_mut()?;
        let message = handshake.write_message(payload)?;
        self.finalize_if_complete()?;
        Ok(message)
    }

    /// Read the peer's next handshake message. Finalizes the session when
    /// the pattern completes.
    pub fn read_handshake_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let handshake = self.handshake_mut()?;
        let payload = handshake.read_message(message)?;
        self.finalize_if_complete()?;
        Ok(payload)
    }

    fn handshake_mut(&mut self) -> Result<&mut HandshakeState> {
        match self.status {
            SessionStatus::Handshaking => {
                self.handshake.as_mut().ok_or(Error::HandshakeNotComplete)
            }
            SessionStatus::Established => Err(Error::HandshakeComplete),
            SessionStatus::Closed => Err(Error::SessionClosed),
        }
    }

    fn finalize_if_complete(&mut self) -> Result<()> {
        let complete = self
            .handshake
            .as_ref()
            .is_some_and(|handshake| handshake.is_complete());
        if !complete {
            return Ok(());
        }
        if let Some(handshake) = self.handshake.take() {
            let transport = handshake.into_transport(self.use_extracted_nonce)?;
            self.send = Some(transport.send);
            self.recv = Some(transport.recv);
            self.handshake_hash = Some(transport.handshake_hash);
            self.remote_static = transport.remote_static;
            self.status = SessionStatus::Established;
        }
        Ok(())
    }

    /// Encrypt application data for the peer.
    ///
    /// Plaintext is capped so the framed record fits one Noise message.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.status {
            SessionStatus::Established => {}
            SessionStatus::Handshaking => return Err(Error::HandshakeNotComplete),
            SessionStatus::Closed => return Err(Error::SessionClosed),
        }
        if plaintext.len() > crate::MAX_MESSAGE_SIZE - crate::crypto::TAG_SIZE {
            return Err(Error::InvalidMessage(format!(
                "plaintext too large: {} bytes",
                plaintext.len()
            )));
        }
        self.send
            .as_mut()
            .ok_or(Error::UninitializedCipher)?
            .encrypt(plaintext, b"")
    }

    /// Decrypt a record from the peer.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.status {
            SessionStatus::Established => {}
            SessionStatus::Handshaking => return Err(Error::HandshakeNotComplete),
            SessionStatus::Closed => return Err(Error::SessionClosed),
        }
        self.recv
            .as_mut()
            .ok_or(Error::UninitializedCipher)?
            .decrypt(ciphertext, b"")
    }

    /// The transcript hash captured at handshake completion.
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        self.handshake_hash
    }

    /// The peer's static public key, when the pattern revealed one.
    pub fn remote_static(&self) -> Option<&X25519PublicKey> {
        self.remote_static.as_ref()
    }

    /// Close the session, zeroizing all key material. Idempotent.
    pub fn close(&mut self) {
        self.handshake = None;
        if let Some(ref mut cipher) = self.send {
            cipher.clear();
        }
        if let Some(ref mut cipher) = self.recv {
            cipher.clear();
        }
        self.send = None;
        self.recv = None;
        self.handshake_hash = None;
        self.status = SessionStatus::Closed;
    }
}

impl std::fmt::Debug for NoiseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSession")
            .field("status", &self.status)
            .field("extracted_nonce", &self.use_extracted_nonce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established_pair(use_extracted_nonce: bool) -> (NoiseSession, NoiseSession) {
        let alice = StaticKeypair::generate();
        let bob = StaticKeypair::generate();

        let mut initiator = NoiseSession::initiator(
            HandshakePattern::Xx,
            b"",
            Some(alice),
            None,
            use_extracted_nonce,
        )
        .expect("initiator");
        let mut responder =
            NoiseSession::responder(HandshakePattern::Xx, b"", Some(bob), use_extracted_nonce)
                .expect("responder");

        let m1 = initiator.write_handshake_message(b"").expect("m1");
        responder.read_handshake_message(&m1).expect("read m1");
        let m2 = responder.write_handshake_message(b"").expect("m2");
        initiator.read_handshake_message(&m2).expect("read m2");
        let m3 = initiator.write_handshake_message(b"").expect("m3");
        responder.read_handshake_message(&m3).expect("read m3");

        (initiator, responder)
    }

    #[test]
    fn test_session_lifecycle() {
        let (mut a, mut b) = established_pair(false);

        assert!(a.is_established());
        assert!(b.is_established());
        assert_eq!(a.handshake_hash(), b.handshake_hash());
        assert!(a.handshake_hash().is_some());

        let ct = a.encrypt(b"hello").expect("encrypt");
        assert_eq!(b.decrypt(&ct).expect("decrypt"), b"hello");

        a.close();
        assert_eq!(a.status(), SessionStatus::Closed);
        assert!(matches!(a.encrypt(b"x"), Err(Error::SessionClosed)));

        // Idempotent.
        a.close();
        assert_eq!(a.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let (mut a, _b) = established_pair(false);
        let oversized = vec![0u8; crate::MAX_MESSAGE_SIZE];
        assert!(matches!(a.encrypt(&oversized), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_encrypt_during_handshake_rejected() {
        let alice = StaticKeypair::generate();
        let mut session =
            NoiseSession::initiator(HandshakePattern::Xx, b"", Some(alice), None, false)
                .expect("session");
        assert!(matches!(
            session.encrypt(b"early"),
            Err(Error::HandshakeNotComplete)
        ));
    }

    #[test]
    fn test_handshake_after_established_rejected() {
        let (mut a, _b) = established_pair(false);
        assert!(matches!(
            a.write_handshake_message(b""),
            Err(Error::HandshakeComplete)
        ));
    }

    #[test]
    fn test_extracted_nonce_transport() {
        let (mut a, mut b) = established_pair(true);

        let records: Vec<Vec<u8>> = (0..3)
            .map(|i| a.encrypt(format!("r{i}").as_bytes()).expect("encrypt"))
            .collect();

        // Out of order is fine in extracted-nonce mode.
        assert_eq!(b.decrypt(&records[1]).expect("decrypt"), b"r1");
        assert_eq!(b.decrypt(&records[0]).expect("decrypt"), b"r0");
        assert_eq!(b.decrypt(&records[2]).expect("decrypt"), b"r2");

        // But replays are not.
        assert!(matches!(b.decrypt(&records[1]), Err(Error::ReplayDetected)));
    }
}
