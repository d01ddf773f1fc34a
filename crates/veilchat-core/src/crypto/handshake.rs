//! Noise handshake state machine for the XX, IK and NK patterns.
//!
//! Each pattern is a fixed sequence of token messages. Writing a message
//! walks the tokens for the current step (generating ephemerals, encrypting
//! statics, mixing Diffie-Hellman results), then encrypts the caller payload;
//! reading is the mirror image. When the last message completes, the state
//! splits into two transport ciphers and is consumed.
//!
//! Every public key received off the wire is length-checked and compared in
//! constant time against the known low-order Curve25519 points before any
//! Diffie-Hellman is performed.

use crate::crypto::cipher::{CipherState, TAG_SIZE};
use crate::crypto::constant_time_eq;
use crate::crypto::keys::{EphemeralKeypair, StaticKeypair, X25519PublicKey, X25519_KEY_SIZE};
use crate::crypto::symmetric::SymmetricState;
use crate::error::{Error, Result};

/// Role in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// We send the first handshake message.
    Initiator,
    /// The peer sends the first handshake message.
    Responder,
}

/// Supported Noise handshake patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakePattern {
    /// Mutual authentication, no prior knowledge of the peer's static key.
    Xx,
    /// Initiator knows the responder's static key and authenticates
    /// immediately.
    Ik,
    /// Initiator knows the responder's static key and stays anonymous.
    Nk,
}

impl HandshakePattern {
    /// Pattern name as it appears in the protocol string.
    pub fn name(&self) -> &'static str {
        match self {
            HandshakePattern::Xx => "XX",
            HandshakePattern::Ik => "IK",
            HandshakePattern::Nk => "NK",
        }
    }

    /// Full protocol name for symmetric-state initialization.
    pub fn protocol_name(&self) -> String {
        format!("Noise_{}_25519_ChaChaPoly_SHA256", self.name())
    }

    fn messages(&self) -> &'static [&'static [Token]] {
        use Token::*;
        match self {
            HandshakePattern::Xx => &[&[E], &[E, Ee, S, Es], &[S, Se]],
            HandshakePattern::Ik => &[&[E, Es, S, Ss], &[E, Ee, Se]],
            HandshakePattern::Nk => &[&[E, Es], &[E, Ee]],
        }
    }

    /// Whether the responder's static key is mixed as a pre-message, which
    /// the initiator must therefore know up front.
    fn has_responder_premessage(&self) -> bool {
        matches!(self, HandshakePattern::Ik | HandshakePattern::Nk)
    }

    fn requires_local_static(&self, role: Role) -> bool {
        match (self, role) {
            (HandshakePattern::Xx, _) => true,
            (HandshakePattern::Ik, _) => true,
            (HandshakePattern::Nk, Role::Initiator) => false,
            (HandshakePattern::Nk, Role::Responder) => true,
        }
    }
}

impl std::fmt::Display for HandshakePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug)]
enum Token {
    E,
    S,
    Ee,
    Es,
    Se,
    Ss,
}

/// The low-order Curve25519 points rejected on receipt. Accepting one would
/// let a peer force the shared secret to a known value.
const LOW_ORDER_POINTS: [[u8; X25519_KEY_SIZE]; 4] = [
    // Neutral element.
    [0u8; 32],
    // Point of order 1 encoded as u-coordinate 1.
    [
        0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0,
    ],
    // Canonical point of order 8.
    [
        0xe0, 0xeb, 0x7a, 0x7c, 0x3b, 0x41, 0xb8, 0xae, 0x16, 0x56, 0xe3, 0xfa, 0xf1, 0x9f, 0xc4,
        0x6a, 0xda, 0x09, 0x8d, 0xeb, 0x9c, 0x32, 0xb1, 0xfd, 0x86, 0x62, 0x05, 0x16, 0x5f, 0x49,
        0xb8, 0x00,
    ],
    // All-ones encoding.
    [0xff; 32],
];

/// Validate a wire-format public key: exact length, not a low-order point.
///
/// The comparison touches every candidate point in full so rejection timing
/// does not reveal which point matched.
pub fn validate_public_key(bytes: &[u8]) -> Result<X25519PublicKey> {
    if bytes.len() != X25519_KEY_SIZE {
        return Err(Error::InvalidPublicKey);
    }
    let mut rejected = 0u8;
    for point in &LOW_ORDER_POINTS {
        rejected |= u8::from(constant_time_eq(bytes, point));
    }
    if rejected != 0 {
        return Err(Error::InvalidPublicKey);
    }
    let mut key = [0u8; X25519_KEY_SIZE];
    key.copy_from_slice(bytes);
    Ok(X25519PublicKey::from_bytes(key))
}

/// Transport material produced by a completed handshake.
pub struct TransportKeys {
    /// Cipher for records we send.
    pub send: CipherState,
    /// Cipher for records we receive.
    pub recv: CipherState,
    /// Transcript hash, identical on both peers; usable for channel binding.
    pub handshake_hash: [u8; 32],
    /// The peer's static public key, when the pattern reveals one.
    pub remote_static: Option<X25519PublicKey>,
}

/// Handshake state machine.
pub struct HandshakeState {
    role: Role,
    pattern: HandshakePattern,
    symmetric: SymmetricState,
    local_static: Option<StaticKeypair>,
    local_ephemeral: Option<EphemeralKeypair>,
    remote_static: Option<X25519PublicKey>,
    remote_ephemeral: Option<X25519PublicKey>,
    message_index: usize,
}

impl HandshakeState {
    /// Create a handshake state.
    ///
    /// `remote_static` is required by the initiator of IK and NK (it is mixed
    /// as a pre-message); `local_static` is required by every pattern/role
    /// combination except the NK initiator.
    pub fn new(
        role: Role,
        pattern: HandshakePattern,
        prologue: &[u8],
        local_static: Option<StaticKeypair>,
        remote_static: Option<X25519PublicKey>,
    ) -> Result<Self> {
        if pattern.requires_local_static(role) && local_static.is_none() {
            return Err(Error::MissingLocalStaticKey);
        }
        if pattern.has_responder_premessage() && role == Role::Initiator && remote_static.is_none()
        {
            return Err(Error::MissingKeys);
        }
        if let Some(ref rs) = remote_static {
            validate_public_key(rs.as_bytes())?;
        }

        let mut symmetric = SymmetricState::new(&pattern.protocol_name());
        symmetric.mix_hash(prologue);

        // Pre-message: the responder's static key is public knowledge in
        // IK/NK and both transcripts must absorb the same bytes.
        if pattern.has_responder_premessage() {
            match role {
                Role::Initiator => {
                    // Checked above.
                    if let Some(ref rs) = remote_static {
                        symmetric.mix_hash(rs.as_bytes());
                    }
                }
                Role::Responder => {
                    if let Some(ref ls) = local_static {
                        symmetric.mix_hash(ls.public_key().as_bytes());
                    }
                }
            }
        }

        Ok(Self {
            role,
            pattern,
            symmetric,
            local_static,
            local_ephemeral: None,
            remote_static,
            remote_ephemeral: None,
            message_index: 0,
        })
    }

    /// Whether all pattern messages have been processed.
    pub fn is_complete(&self) -> bool {
        self.message_index >= self.pattern.messages().len()
    }

    /// Whether the next pattern message is ours to write.
    pub fn is_write_turn(&self) -> bool {
        let initiator_writes = self.message_index % 2 == 0;
        match self.role {
            Role::Initiator => initiator_writes,
            Role::Responder => !initiator_writes,
        }
    }

    /// The peer's static key, once learned.
    pub fn remote_static(&self) -> Option<&X25519PublicKey> {
        self.remote_static.as_ref()
    }

    /// Current transcript hash.
    pub fn handshake_hash(&self) -> [u8; 32] {
        self.symmetric.handshake_hash()
    }

    /// Produce the next handshake message carrying `payload`.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if self.is_complete() {
            return Err(Error::HandshakeComplete);
        }
        if !self.is_write_turn() {
            return Err(Error::InvalidMessage("not our turn to write".into()));
        }

        let tokens = self.pattern.messages()[self.message_index];
        let mut message = Vec::new();

        for token in tokens {
            match token {
                Token::E => {
                    let ephemeral = EphemeralKeypair::generate();
                    message.extend_from_slice(ephemeral.public_key().as_bytes());
                    self.symmetric.mix_hash(ephemeral.public_key().as_bytes());
                    self.local_ephemeral = Some(ephemeral);
                }
                Token::S => {
                    let public = self
                        .local_static
                        .as_ref()
                        .ok_or(Error::MissingLocalStaticKey)?
                        .public_key()
                        .clone();
                    let encrypted = self.symmetric.encrypt_and_hash(public.as_bytes())?;
                    message.extend_from_slice(&encrypted);
                }
                dh => {
                    let shared = self.token_dh(*dh)?;
                    self.symmetric.mix_key(shared.as_bytes());
                }
            }
        }

        message.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);
        self.message_index += 1;
        Ok(message)
    }

    /// Consume the peer's next handshake message, returning its payload.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.is_complete() {
            return Err(Error::HandshakeComplete);
        }
        if self.is_write_turn() {
            return Err(Error::InvalidMessage("not our turn to read".into()));
        }

        let tokens = self.pattern.messages()[self.message_index];
        let mut cursor = 0usize;

        for token in tokens {
            match token {
                Token::E => {
                    let bytes = take(message, &mut cursor, X25519_KEY_SIZE)?;
                    let key = validate_public_key(bytes)?;
                    self.symmetric.mix_hash(key.as_bytes());
                    self.remote_ephemeral = Some(key);
                }
                Token::S => {
                    let len = if self.symmetric.cipher_has_key() {
                        X25519_KEY_SIZE + TAG_SIZE
                    } else {
                        X25519_KEY_SIZE
                    };
                    let bytes = take(message, &mut cursor, len)?;
                    let decrypted = self
                        .symmetric
                        .decrypt_and_hash(bytes)
                        .map_err(|_| Error::AuthenticationFailure)?;
                    let key = validate_public_key(&decrypted)?;
                    self.remote_static = Some(key);
                }
                dh => {
                    let shared = self.token_dh(*dh)?;
                    self.symmetric.mix_key(shared.as_bytes());
                }
            }
        }

        let payload = self.symmetric.decrypt_and_hash(&message[cursor..])?;
        self.message_index += 1;
        Ok(payload)
    }

    /// Finish the handshake, producing the two transport ciphers.
    ///
    /// The initiator sends on the first derived cipher and receives on the
    /// second; the responder is mirrored.
    pub fn into_transport(self, use_extracted_nonce: bool) -> Result<TransportKeys> {
        if !self.is_complete() {
            return Err(Error::HandshakeNotComplete);
        }

        let handshake_hash = self.symmetric.handshake_hash();
        let remote_static = self.remote_static.clone();
        let (c1, c2) = self.symmetric.split(use_extracted_nonce);

        let (send, recv) = match self.role {
            Role::Initiator => (c1, c2),
            Role::Responder => (c2, c1),
        };

        Ok(TransportKeys {
            send,
            recv,
            handshake_hash,
            remote_static,
        })
    }

    /// Diffie-Hellman for a mixing token, resolved by token and role.
    fn token_dh(&self, token: Token) -> Result<crate::crypto::keys::SharedSecret> {
        let local_e = || {
            self.local_ephemeral
                .as_ref()
                .ok_or(Error::MissingKeys)
        };
        let local_s = || {
            self.local_static
                .as_ref()
                .ok_or(Error::MissingLocalStaticKey)
        };
        let remote_e = || self.remote_ephemeral.as_ref().ok_or(Error::MissingKeys);
        let remote_s = || self.remote_static.as_ref().ok_or(Error::MissingKeys);

        match (token, self.role) {
            (Token::Ee, _) => Ok(local_e()?.diffie_hellman(remote_e()?)),
            (Token::Ss, _) => Ok(local_s()?.diffie_hellman(remote_s()?)),
            (Token::Es, Role::Initiator) => Ok(local_e()?.diffie_hellman(remote_s()?)),
            (Token::Es, Role::Responder) => Ok(local_s()?.diffie_hellman(remote_e()?)),
            (Token::Se, Role::Initiator) => Ok(local_s()?.diffie_hellman(remote_e()?)),
            (Token::Se, Role::Responder) => Ok(local_e()?.diffie_hellman(remote_s()?)),
            (Token::E, _) | (Token::S, _) => {
                Err(Error::InvalidMessage("non-DH token in DH position".into()))
            }
        }
    }
}

impl std::fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeState")
            .field("role", &self.role)
            .field("pattern", &self.pattern)
            .field("message_index", &self.message_index)
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn take<'a>(message: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= message.len())
        .ok_or_else(|| Error::InvalidMessage("message truncated".into()))?;
    let slice = &message[*cursor..end];
    *cursor = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_handshake(
        pattern: HandshakePattern,
        initiator_static: Option<StaticKeypair>,
        responder_static: StaticKeypair,
        initiator_knows_responder: bool,
    ) -> (TransportKeys, TransportKeys) {
        let responder_public = responder_static.public_key().clone();
        let remote = initiator_knows_responder.then_some(responder_public);

        let mut initiator =
            HandshakeState::new(Role::Initiator, pattern, b"", initiator_static, remote)
                .expect("initiator state");
        let mut responder = HandshakeState::new(
            Role::Responder,
            pattern,
            b"",
            Some(responder_static),
            None,
        )
        .expect("responder state");

        while !initiator.is_complete() || !responder.is_complete() {
            if initiator.is_write_turn() {
                let msg = initiator.write_message(b"").expect("write");
                responder.read_message(&msg).expect("read");
            } else {
                let msg = responder.write_message(b"").expect("write");
                initiator.read_message(&msg).expect("read");
            }
        }

        (
            initiator.into_transport(false).expect("initiator transport"),
            responder.into_transport(false).expect("responder transport"),
        )
    }

    #[test]
    fn test_xx_handshake() {
        let alice = StaticKeypair::generate();
        let bob = StaticKeypair::generate();
        let alice_public = alice.public_key().clone();
        let bob_public = bob.public_key().clone();

        let (mut a, mut b) = run_handshake(HandshakePattern::Xx, Some(alice), bob, false);

        assert_eq!(a.handshake_hash, b.handshake_hash);
        // XX reveals both statics.
        assert_eq!(a.remote_static.as_ref(), Some(&bob_public));
        assert_eq!(b.remote_static.as_ref(), Some(&alice_public));

        let ct = a.send.encrypt(b"hello", b"").expect("encrypt");
        assert_eq!(b.recv.decrypt(&ct, b"").expect("decrypt"), b"hello");

        let ct = b.send.encrypt(b"hi back", b"").expect("encrypt");
        assert_eq!(a.recv.decrypt(&ct, b"").expect("decrypt"), b"hi back");
    }

    #[test]
    fn test_ik_handshake() {
        let alice = StaticKeypair::generate();
        let bob = StaticKeypair::generate();
        let alice_public = alice.public_key().clone();

        let (mut a, mut b) = run_handshake(HandshakePattern::Ik, Some(alice), bob, true);

        assert_eq!(a.handshake_hash, b.handshake_hash);
        assert_eq!(b.remote_static.as_ref(), Some(&alice_public));

        let ct = a.send.encrypt(b"known peer", b"").expect("encrypt");
        assert_eq!(b.recv.decrypt(&ct, b"").expect("decrypt"), b"known peer");
    }

    #[test]
    fn test_nk_handshake() {
        let bob = StaticKeypair::generate();

        let (mut a, mut b) = run_handshake(HandshakePattern::Nk, None, bob, true);

        assert_eq!(a.handshake_hash, b.handshake_hash);
        // NK leaves the initiator anonymous.
        assert!(b.remote_static.is_none());

        let ct = a.send.encrypt(b"anonymous", b"").expect("encrypt");
        assert_eq!(b.recv.decrypt(&ct, b"").expect("decrypt"), b"anonymous");
    }

    #[test]
    fn test_handshake_payloads_roundtrip() {
        let alice = StaticKeypair::generate();
        let bob = StaticKeypair::generate();

        let mut initiator = HandshakeState::new(
            Role::Initiator,
            HandshakePattern::Xx,
            b"prologue",
            Some(alice),
            None,
        )
        .expect("initiator");
        let mut responder = HandshakeState::new(
            Role::Responder,
            HandshakePattern::Xx,
            b"prologue",
            Some(bob),
            None,
        )
        .expect("responder");

        let m1 = initiator.write_message(b"first payload").expect("write 1");
        assert_eq!(responder.read_message(&m1).expect("read 1"), b"first payload");

        let m2 = responder.write_message(b"second payload").expect("write 2");
        assert_eq!(initiator.read_message(&m2).expect("read 2"), b"second payload");

        let m3 = initiator.write_message(b"third payload").expect("write 3");
        assert_eq!(responder.read_message(&m3).expect("read 3"), b"third payload");
    }

    #[test]
    fn test_prologue_mismatch_fails() {
        let alice = StaticKeypair::generate();
        let bob = StaticKeypair::generate();

        let mut initiator = HandshakeState::new(
            Role::Initiator,
            HandshakePattern::Xx,
            b"one prologue",
            Some(alice),
            None,
        )
        .expect("initiator");
        let mut responder = HandshakeState::new(
            Role::Responder,
            HandshakePattern::Xx,
            b"another prologue",
            Some(bob),
            None,
        )
        .expect("responder");

        let m1 = initiator.write_message(b"").expect("write 1");
        responder.read_message(&m1).expect("message 1 is cleartext");
        let m2 = responder.write_message(b"").expect("write 2");
        // Message 2 carries an encrypted static; diverged transcripts fail.
        assert!(initiator.read_message(&m2).is_err());
    }

    #[test]
    fn test_missing_local_static_rejected() {
        let result = HandshakeState::new(Role::Initiator, HandshakePattern::Xx, b"", None, None);
        assert!(matches!(result, Err(Error::MissingLocalStaticKey)));
    }

    #[test]
    fn test_missing_remote_static_rejected() {
        let alice = StaticKeypair::generate();
        let result =
            HandshakeState::new(Role::Initiator, HandshakePattern::Ik, b"", Some(alice), None);
        assert!(matches!(result, Err(Error::MissingKeys)));
    }

    #[test]
    fn test_low_order_points_rejected() {
        for point in &LOW_ORDER_POINTS {
            assert!(matches!(
                validate_public_key(point),
                Err(Error::InvalidPublicKey)
            ));
        }
        assert!(validate_public_key(&[9u8; 31]).is_err());
        assert!(validate_public_key(StaticKeypair::generate().public_key().as_bytes()).is_ok());
    }

    #[test]
    fn test_low_order_ephemeral_rejected_on_wire() {
        let bob = StaticKeypair::generate();
        let mut responder =
            HandshakeState::new(Role::Responder, HandshakePattern::Xx, b"", Some(bob), None)
                .expect("responder");

        // First XX message is a bare ephemeral plus cleartext payload.
        let mut message = Vec::new();
        message.extend_from_slice(&LOW_ORDER_POINTS[2]);
        assert!(matches!(
            responder.read_message(&message),
            Err(Error::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_truncated_message_rejected() {
        let bob = StaticKeypair::generate();
        let mut responder =
            HandshakeState::new(Role::Responder, HandshakePattern::Xx, b"", Some(bob), None)
                .expect("responder");
        assert!(matches!(
            responder.read_message(&[0u8; 16]),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_wrong_turn_rejected() {
        let alice = StaticKeypair::generate();
        let mut initiator =
            HandshakeState::new(Role::Initiator, HandshakePattern::Xx, b"", Some(alice), None)
                .expect("initiator");
        assert!(initiator.read_message(&[0u8; 48]).is_err());
    }

    #[test]
    fn test_transport_before_completion_rejected() {
        let alice = StaticKeypair::generate();
        let initiator =
            HandshakeState::new(Role::Initiator, HandshakePattern::Xx, b"", Some(alice), None)
                .expect("initiator");
        assert!(matches!(
            initiator.into_transport(false),
            Err(Error::HandshakeNotComplete)
        ));
    }

    #[test]
    fn test_write_after_completion_rejected() {
        let bob = StaticKeypair::generate();
        let bob_public = bob.public_key().clone();

        let mut initiator = HandshakeState::new(
            Role::Initiator,
            HandshakePattern::Nk,
            b"",
            None,
            Some(bob_public),
        )
        .expect("initiator");
        let mut responder =
            HandshakeState::new(Role::Responder, HandshakePattern::Nk, b"", Some(bob), None)
                .expect("responder");

        let m1 = initiator.write_message(b"").expect("write 1");
        responder.read_message(&m1).expect("read 1");
        let m2 = responder.write_message(b"").expect("write 2");
        initiator.read_message(&m2).expect("read 2");

        assert!(matches!(
            initiator.write_message(b""),
            Err(Error::HandshakeComplete)
        ));
    }
}
