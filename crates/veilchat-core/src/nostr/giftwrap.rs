//! NIP-17 seals and NIP-59 gift-wraps.
//!
//! A private message is a three-layer onion:
//!
//! 1. **Rumor** (kind 14): the unsigned message, real timestamp, authored by
//!    the sender identity.
//! 2. **Seal** (kind 13): the rumor encrypted to the recipient under a fresh
//!    ephemeral key, which also signs the seal. Timestamp randomized.
//! 3. **Gift-wrap** (kind 1059): the seal encrypted to the recipient under a
//!    second fresh ephemeral key, tagged `["p", recipient]`. Timestamp
//!    randomized.
//!
//! The identity key never signs anything that touches the wire, so observers
//! cannot link a wrap to its sender. The rumor's `pubkey` is still
//! trustworthy: only a key holder who could complete the NIP-44 exchange with
//! the recipient could have produced the seal around it.

use crate::error::{Error, Result};
use crate::nostr::event::{sign_event, verify_event, Event};
use crate::nostr::{kind, nip44, randomized_timestamp, unix_now, DecryptedMessage, NostrKeypair};

/// Build a gift-wrapped private message ready for publishing.
pub fn create_private_message(
    content: &str,
    recipient_pub_hex: &str,
    sender: &NostrKeypair,
) -> Result<Event> {
    let rumor = Event::build(
        sender.public_key_hex(),
        unix_now(),
        kind::RUMOR,
        Vec::new(),
        content,
    );

    let seal = seal_rumor(&rumor, recipient_pub_hex)?;
    wrap_seal(&seal, recipient_pub_hex)
}

/// Encrypt the rumor into a kind-13 seal signed by a fresh ephemeral key.
fn seal_rumor(rumor: &Event, recipient_pub_hex: &str) -> Result<Event> {
    let ephemeral = NostrKeypair::generate();
    let ciphertext = nip44::encrypt(&rumor.to_json()?, recipient_pub_hex, ephemeral.secret_key())?;

    let mut seal = Event::build(
        ephemeral.public_key_hex(),
        randomized_timestamp(),
        kind::SEAL,
        Vec::new(),
        ciphertext,
    );
    sign_event(&mut seal, &ephemeral)?;
    Ok(seal)
}

/// Encrypt the seal into a kind-1059 gift-wrap under a second ephemeral key.
fn wrap_seal(seal: &Event, recipient_pub_hex: &str) -> Result<Event> {
    let ephemeral = NostrKeypair::generate();
    let ciphertext = nip44::encrypt(&seal.to_json()?, recipient_pub_hex, ephemeral.secret_key())?;

    let mut wrap = Event::build(
        ephemeral.public_key_hex(),
        randomized_timestamp(),
        kind::GIFT_WRAP,
        vec![vec!["p".to_string(), recipient_pub_hex.to_string()]],
        ciphertext,
    );
    sign_event(&mut wrap, &ephemeral)?;
    Ok(wrap)
}

/// Unwrap a received kind-1059 event addressed to `recipient`.
///
/// Peels the wrap and the seal with the recipient's secret, checks the seal
/// signature, and returns the rumor's content, sender and real timestamp.
pub fn decrypt_private_message(
    wrap: &Event,
    recipient: &NostrKeypair,
) -> Result<DecryptedMessage> {
    if wrap.kind != kind::GIFT_WRAP {
        return Err(Error::InvalidMessage(format!(
            "expected kind {}, got {}",
            kind::GIFT_WRAP,
            wrap.kind
        )));
    }

    let seal_json = nip44::decrypt(&wrap.content, &wrap.pubkey, recipient.secret_key())?;
    let seal = Event::from_json(&seal_json)?;
    if seal.kind != kind::SEAL {
        return Err(Error::InvalidMessage(format!(
            "expected kind {}, got {}",
            kind::SEAL,
            seal.kind
        )));
    }
    if !verify_event(&seal) {
        return Err(Error::AuthenticationFailure);
    }

    let rumor_json = nip44::decrypt(&seal.content, &seal.pubkey, recipient.secret_key())?;
    let rumor = Event::from_json(&rumor_json)?;

    Ok(DecryptedMessage {
        content: rumor.content,
        sender_pubkey: rumor.pubkey,
        timestamp: rumor.created_at,
    })
}
