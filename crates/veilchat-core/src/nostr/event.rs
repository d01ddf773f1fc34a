//! Nostr events: canonical serialization, event-ID hashing and BIP-340
//! Schnorr signatures.
//!
//! The event id is the SHA-256 of the canonical JSON array
//! `[0, pubkey, created_at, kind, tags, content]` with no insignificant
//! whitespace and minimal RFC 8259 string escaping. A signature is valid when
//! it verifies against that digest under the event's x-only pubkey.

use crate::crypto::random_bytes;
use crate::error::{Error, Result};
use crate::nostr::{kind, unix_now, NostrKeypair};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A Nostr event in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Author's x-only pubkey, lowercase hex.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: u16,
    /// Tag list; each tag is an array of strings.
    pub tags: Vec<Vec<String>>,
    /// Content payload.
    pub content: String,
    /// 64-byte Schnorr signature, lowercase hex. Empty on unsigned rumors.
    pub sig: String,
}

impl Event {
    /// Build an unsigned event with its id computed. `sig` stays empty until
    /// [`sign_event`] runs.
    pub fn build(
        pubkey: impl Into<String>,
        created_at: i64,
        event_kind: u16,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self {
            id: String::new(),
            pubkey: pubkey.into(),
            created_at,
            kind: event_kind,
            tags,
            content: content.into(),
            sig: String::new(),
        };
        event.id = event.compute_id();
        event
    }

    /// The canonical serialization hashed into the event id.
    pub fn canonical_serialization(&self) -> String {
        let mut out = String::with_capacity(self.content.len() + 128);
        out.push_str("[0,\"");
        out.push_str(&self.pubkey.to_lowercase());
        out.push_str("\",");
        out.push_str(&self.created_at.to_string());
        out.push(',');
        out.push_str(&self.kind.to_string());
        out.push_str(",[");
        for (i, tag) in self.tags.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push('[');
            for (j, item) in tag.iter().enumerate() {
                if j > 0 {
                    out.push(',');
                }
                out.push('"');
                escape_json_into(&mut out, item);
                out.push('"');
            }
            out.push(']');
        }
        out.push_str("],\"");
        escape_json_into(&mut out, &self.content);
        out.push_str("\"]");
        out
    }

    /// Compute the event id from the canonical serialization.
    pub fn compute_id(&self) -> String {
        let digest = Sha256::digest(self.canonical_serialization().as_bytes());
        hex::encode(digest)
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Compute the id and Schnorr-sign an event.
///
/// Overwrites `pubkey`, `id` and `sig` from the signing key. Signing draws 32
/// bytes of auxiliary randomness per BIP-340.
pub fn sign_event(event: &mut Event, keys: &NostrKeypair) -> Result<()> {
    let secp = Secp256k1::new();

    event.pubkey = keys.public_key_hex().to_string();
    event.id = event.compute_id();

    let digest: [u8; 32] = hex::decode(&event.id)
        .map_err(|e| Error::Encoding(e.to_string()))?
        .try_into()
        .map_err(|_| Error::Encoding("event id is not 32 bytes".into()))?;
    let message =
        Message::from_digest_slice(&digest).map_err(|e| Error::Encoding(e.to_string()))?;

    let aux: [u8; 32] = random_bytes();
    let signature = secp.sign_schnorr_with_aux_rand(&message, keys.secp_keypair(), &aux);
    event.sig = hex::encode(signature.as_ref());
    Ok(())
}

/// Verify an event's signature against its canonical digest.
///
/// Any structural problem (bad hex, wrong lengths, invalid pubkey) counts as
/// verification failure rather than an error.
pub fn verify_event(event: &Event) -> bool {
    let Ok(pubkey_bytes) = hex::decode(&event.pubkey) else {
        return false;
    };
    let Ok(xonly) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(&event.sig) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };

    let digest: [u8; 32] = Sha256::digest(event.canonical_serialization().as_bytes()).into();
    let Ok(message) = Message::from_digest_slice(&digest) else {
        return false;
    };

    Secp256k1::verification_only()
        .verify_schnorr(&signature, &message, &xonly)
        .is_ok()
}

/// Build and sign an ephemeral geohash chat note (kind 20000).
pub fn build_geohash_note(
    content: &str,
    geohash: &str,
    nickname: Option<&str>,
    teleport: bool,
    keys: &NostrKeypair,
) -> Result<Event> {
    let mut tags = vec![vec!["g".to_string(), geohash.to_string()]];
    if let Some(nick) = nickname {
        tags.push(vec!["n".to_string(), nick.to_string()]);
    }
    if teleport {
        tags.push(vec!["t".to_string(), "teleport".to_string()]);
    }

    let mut event = Event::build(
        keys.public_key_hex(),
        unix_now(),
        kind::GEOHASH_NOTE,
        tags,
        content,
    );
    sign_event(&mut event, keys)?;
    Ok(event)
}

/// Build and sign a geohash presence beacon (kind 20001, empty content).
pub fn build_presence(geohash: &str, keys: &NostrKeypair) -> Result<Event> {
    let mut event = Event::build(
        keys.public_key_hex(),
        unix_now(),
        kind::GEOHASH_PRESENCE,
        vec![vec!["g".to_string(), geohash.to_string()]],
        "",
    );
    sign_event(&mut event, keys)?;
    Ok(event)
}

/// Minimal JSON string escaping per RFC 8259: the two mandatory escapes, the
/// named control shorthands, and `\uXXXX` for the rest of the control range.
fn escape_json_into(out: &mut String, input: &str) {
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}
