//! Cross-module Nostr scenarios: canonical hashing vectors, signing,
//! encryption round-trips and gift-wrap metadata properties.

use std::collections::HashSet;
use veilchat_core::identity::{decode_nsec, encode_nsec};
use veilchat_core::nostr::{
    self, create_private_message, decrypt_private_message, kind, nip04, nip44, sign_event,
    unix_now, verify_event, Event, NostrKeypair,
};

/// Pinned vector: the canonical serialization rule must reproduce this id
/// bit-for-bit.
#[test]
fn canonical_event_id_vector() {
    let event = Event::build(
        "0000000000000000000000000000000000000000000000000000000000000001",
        1700000000,
        kind::TEXT_NOTE,
        vec![],
        "hello",
    );

    assert_eq!(
        event.canonical_serialization(),
        "[0,\"0000000000000000000000000000000000000000000000000000000000000001\",1700000000,1,[],\"hello\"]"
    );
    assert_eq!(
        event.id,
        "b8591d69d0638d47eb20e0505fdbaf565e52675fa998010df62813ad3d11b486"
    );
}

#[test]
fn event_id_matches_recomputation_after_parse() {
    let keys = NostrKeypair::generate();
    let mut event = Event::build(
        keys.public_key_hex(),
        unix_now(),
        kind::TEXT_NOTE,
        vec![vec!["t".into(), "tag with \"quotes\"".into()]],
        "content with\nnewline and unicode: \u{00e9}\u{4e16}",
    );
    sign_event(&mut event, &keys).expect("sign");

    let parsed = Event::from_json(&event.to_json().expect("json")).expect("parse");
    assert_eq!(parsed, event);
    assert_eq!(parsed.compute_id(), parsed.id);
    assert!(verify_event(&parsed));
}

#[test]
fn nip44_round_trip_law() {
    let sender = NostrKeypair::generate();
    let recipient = NostrKeypair::generate();

    let payload = nip44::encrypt("round trip", recipient.public_key_hex(), sender.secret_key())
        .expect("encrypt");
    let plaintext = nip44::decrypt(&payload, sender.public_key_hex(), recipient.secret_key())
        .expect("decrypt");
    assert_eq!(plaintext, "round trip");
}

#[test]
fn nip04_round_trip_law() {
    let sender = NostrKeypair::generate();
    let recipient = NostrKeypair::generate();

    let content = nip04::encrypt("legacy round trip", recipient.public_key_hex(), sender.secret_key())
        .expect("encrypt");
    let plaintext = nip04::decrypt(&content, sender.public_key_hex(), recipient.secret_key())
        .expect("decrypt");
    assert_eq!(plaintext, "legacy round trip");
}

#[test]
fn gift_wrap_round_trip_with_real_rumor_timestamp() {
    let sender = NostrKeypair::generate();
    let recipient = NostrKeypair::generate();

    let wrap = create_private_message("ping", recipient.public_key_hex(), &sender).expect("wrap");
    let message = decrypt_private_message(&wrap, &recipient).expect("unwrap");

    assert_eq!(message.content, "ping");
    assert_eq!(message.sender_pubkey, sender.public_key_hex());
    assert!((message.timestamp - unix_now()).abs() < 60);
}

#[test]
fn gift_wrap_hides_sender_across_many_wraps() {
    let sender = NostrKeypair::generate();
    let recipient = NostrKeypair::generate();

    let mut outer_pubkeys = HashSet::new();
    for _ in 0..100 {
        let wrap =
            create_private_message("same plaintext", recipient.public_key_hex(), &sender)
                .expect("wrap");
        assert_ne!(wrap.pubkey, sender.public_key_hex());
        outer_pubkeys.insert(wrap.pubkey);
    }

    // Every wrap rides a fresh ephemeral key.
    assert_eq!(outer_pubkeys.len(), 100);
}

#[test]
fn gift_wrap_events_verify_under_their_ephemeral_keys() {
    let sender = NostrKeypair::generate();
    let recipient = NostrKeypair::generate();

    let wrap = create_private_message("signed", recipient.public_key_hex(), &sender).expect("wrap");
    assert_eq!(wrap.kind, kind::GIFT_WRAP);
    assert!(verify_event(&wrap));

    let mut tampered = wrap.clone();
    tampered.content.push('x');
    assert!(!verify_event(&tampered));
}

#[test]
fn outer_timestamps_are_jittered_but_bounded() {
    let sender = NostrKeypair::generate();
    let recipient = NostrKeypair::generate();

    let mut timestamps = Vec::new();
    for _ in 0..20 {
        let wrap = create_private_message("t", recipient.public_key_hex(), &sender).expect("wrap");
        assert!((wrap.created_at - unix_now()).abs() <= nostr::TIMESTAMP_JITTER_SECS + 60);
        timestamps.push(wrap.created_at);
    }

    // With ±900 s of smear, twenty identical timestamps would mean the
    // randomization is broken.
    let distinct: HashSet<i64> = timestamps.iter().copied().collect();
    assert!(distinct.len() > 1);
}

#[test]
fn bech32_round_trip_law() {
    let keys = NostrKeypair::generate();
    let nsec = encode_nsec(&keys.secret_bytes()).expect("encode");
    let decoded = decode_nsec(&nsec).expect("decode");
    let restored = NostrKeypair::from_secret_bytes(&decoded).expect("restore");
    assert_eq!(restored.public_key_hex(), keys.public_key_hex());
}
