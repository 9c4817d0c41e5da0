//! End-to-end two-party session scenarios over the public API.

use pawl_olm::{Account, OlmMessage, Session, MAX_MESSAGE_GAP};
use pawl_crypto::Curve25519PublicKey;
use rand::{rngs::StdRng, SeedableRng};

fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Accounts for both sides plus an established outbound session for Alice.
fn handshake(seed: u64) -> (StdRng, Account, Account, Session) {
    let mut rng = rng(seed);
    let alice = Account::new(&mut rng);
    let mut bob = Account::new(&mut rng);
    bob.generate_one_time_keys(&mut rng, 1);

    let bob_one_time = *bob.one_time_keys().curve25519.values().next().unwrap();
    let session = Session::new_outbound(
        &mut rng,
        &alice,
        &bob.identity_keys().curve25519,
        &bob_one_time,
    )
    .unwrap();
    (rng, alice, bob, session)
}

fn ratchet_key_of(message: &OlmMessage) -> Curve25519PublicKey {
    match message {
        OlmMessage::PreKey(m) => m.message.ratchet_key,
        OlmMessage::Normal(m) => m.ratchet_key,
    }
}

#[test]
fn two_party_exchange() {
    let (mut rng, alice, bob, mut alice_session) = handshake(101);

    // Alice -> Bob, pre-key framing.
    let first = alice_session.encrypt(&mut rng, "têst1".as_bytes()).unwrap();
    assert_eq!(first.message_type(), 0);
    let OlmMessage::PreKey(pre_key) = &first else { panic!("expected pre-key framing") };

    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    assert_eq!(bob_session.session_id(), alice_session.session_id());
    assert!(bob_session.matches_inbound(pre_key));
    assert!(bob_session.matches_inbound_from(&alice.identity_keys().curve25519, pre_key));

    assert_eq!(bob_session.decrypt(&first).unwrap(), "têst1".as_bytes());
    assert!(bob_session.has_received_message());

    // Bob -> Alice, normal framing from the first reply on.
    let reply = bob_session.encrypt(&mut rng, "hot beverage: ☕".as_bytes()).unwrap();
    assert_eq!(reply.message_type(), 1);
    assert_eq!(alice_session.decrypt(&reply).unwrap(), "hot beverage: ☕".as_bytes());
    assert!(alice_session.has_received_message());

    // Alice's follow-up drops the pre-key framing.
    let followup = alice_session.encrypt(&mut rng, b"back to you").unwrap();
    assert_eq!(followup.message_type(), 1);
    assert_eq!(bob_session.decrypt(&followup).unwrap(), b"back to you");
}

#[test]
fn wire_roundtrip_through_base64() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(102);

    let message = alice_session.encrypt(&mut rng, b"over the wire").unwrap();
    let restored =
        OlmMessage::from_type_and_base64(message.message_type(), &message.to_base64()).unwrap();

    let OlmMessage::PreKey(pre_key) = &restored else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    assert_eq!(bob_session.decrypt(&restored).unwrap(), b"over the wire");
}

#[test]
fn ratchet_advances_use_fresh_keys() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(103);

    let first = alice_session.encrypt(&mut rng, b"first").unwrap();
    let alice_key_before = ratchet_key_of(&first);

    let OlmMessage::PreKey(pre_key) = &first else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    bob_session.decrypt(&first).unwrap();

    // Bob's reply triggers a DH ratchet step on Alice's side.
    let reply = bob_session.encrypt(&mut rng, b"reply").unwrap();
    alice_session.decrypt(&reply).unwrap();

    // Alice's next send must travel under a fresh ratchet key.
    let second = alice_session.encrypt(&mut rng, b"second").unwrap();
    assert_ne!(ratchet_key_of(&second), alice_key_before);
    assert_eq!(bob_session.decrypt(&second).unwrap(), b"second");

    // And the turn after that rotates Bob's key in the same way.
    let bob_key_before = ratchet_key_of(&reply);
    let reply_two = bob_session.encrypt(&mut rng, b"reply two").unwrap();
    assert_ne!(ratchet_key_of(&reply_two), bob_key_before);
    alice_session.decrypt(&reply_two).unwrap();
}

#[test]
fn out_of_order_delivery() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(104);

    let messages: Vec<_> = (0..5)
        .map(|i| alice_session.encrypt(&mut rng, format!("message {i}").as_bytes()).unwrap())
        .collect();

    let OlmMessage::PreKey(pre_key) = &messages[0] else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();

    for index in [0usize, 3, 1, 4, 2] {
        assert_eq!(
            bob_session.decrypt(&messages[index]).unwrap(),
            format!("message {index}").as_bytes(),
            "failed at out-of-order index {index}"
        );
    }

    // Each skipped key is consumed exactly once: a replay no longer finds
    // its message key.
    assert!(bob_session.decrypt(&messages[1]).is_err());
}

#[test]
fn counter_gaps_beyond_the_limit_are_rejected() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(105);

    let first = alice_session.encrypt(&mut rng, b"index 0").unwrap();
    let OlmMessage::PreKey(pre_key) = &first else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    bob_session.decrypt(&first).unwrap();

    // Drop indices 1..=2000 on the floor, keep the two after the edge.
    for _ in 1..=2000u32 {
        alice_session.encrypt(&mut rng, b"lost").unwrap();
    }
    let at_limit = alice_session.encrypt(&mut rng, b"index 2001").unwrap();
    let past_limit = alice_session.encrypt(&mut rng, b"index 2002").unwrap();

    // Gap of 2001 from chain position 1: rejected, session unchanged.
    assert!(matches!(
        bob_session.decrypt(&past_limit),
        Err(pawl_olm::OlmError::MessageGapTooLarge(MAX_MESSAGE_GAP))
    ));

    // Gap of exactly 2000: accepted.
    assert_eq!(bob_session.decrypt(&at_limit).unwrap(), b"index 2001");

    // The skipped-key store is bounded, so only the most recent of those
    // 2000 skipped indices kept their keys.
    assert_eq!(bob_session.decrypt(&past_limit).unwrap(), b"index 2002");
}

#[test]
fn tampering_is_detected_and_state_preserved() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(106);

    let first = alice_session.encrypt(&mut rng, b"authentic").unwrap();
    let OlmMessage::PreKey(pre_key) = &first else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();

    // Flip one wire bit (the last byte lands in the embedded message MAC).
    let mut bytes = pawl_crypto::base64_decode(&first.to_base64()).unwrap();
    *bytes.last_mut().unwrap() ^= 1;
    let tampered =
        OlmMessage::from_type_and_base64(0, &pawl_crypto::base64_encode(&bytes)).unwrap();
    assert!(matches!(
        bob_session.decrypt(&tampered),
        Err(pawl_olm::OlmError::BadMessageMac)
    ));
    assert!(!bob_session.has_received_message());

    // The untouched original still decrypts afterwards.
    assert_eq!(bob_session.decrypt(&first).unwrap(), b"authentic");
}

#[test]
fn unknown_one_time_key_is_rejected() {
    let mut rng = rng(107);
    let alice = Account::new(&mut rng);
    let bob = Account::new(&mut rng);
    let mut stranger = Account::new(&mut rng);

    // Alice encrypts to a key Bob never published.
    stranger.generate_one_time_keys(&mut rng, 1);
    let foreign_key = *stranger.one_time_keys().curve25519.values().next().unwrap();

    let mut session =
        Session::new_outbound(&mut rng, &alice, &bob.identity_keys().curve25519, &foreign_key)
            .unwrap();
    let message = session.encrypt(&mut rng, b"to nobody").unwrap();
    let OlmMessage::PreKey(pre_key) = &message else { panic!("expected pre-key framing") };

    assert!(matches!(
        Session::new_inbound(&bob, pre_key),
        Err(pawl_olm::OlmError::BadMessageKeyId)
    ));
}

#[test]
fn inbound_with_pinned_identity_checks_the_sender() {
    let (mut rng, alice, bob, mut alice_session) = handshake(108);
    let message = alice_session.encrypt(&mut rng, b"who goes there").unwrap();
    let OlmMessage::PreKey(pre_key) = &message else { panic!("expected pre-key framing") };

    let wrong_identity = Account::new(&mut rng).identity_keys().curve25519;
    assert!(matches!(
        Session::new_inbound_from(&bob, &wrong_identity, pre_key),
        Err(pawl_olm::OlmError::BadMessageKeyId)
    ));

    let mut bob_session =
        Session::new_inbound_from(&bob, &alice.identity_keys().curve25519, pre_key).unwrap();
    assert_eq!(bob_session.decrypt(&message).unwrap(), b"who goes there");
}

#[test]
fn fallback_key_accepts_sessions_across_one_rotation() {
    let mut rng = rng(109);
    let alice = Account::new(&mut rng);
    let mut bob = Account::new(&mut rng);
    bob.generate_fallback_key(&mut rng);
    let fallback = *bob.fallback_key().curve25519.values().next().unwrap();

    let mut alice_session =
        Session::new_outbound(&mut rng, &alice, &bob.identity_keys().curve25519, &fallback)
            .unwrap();
    let message = alice_session.encrypt(&mut rng, b"via fallback").unwrap();
    let OlmMessage::PreKey(pre_key) = &message else { panic!("expected pre-key framing") };

    // One rotation later the old key still sits in the grace slot.
    bob.generate_fallback_key(&mut rng);
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    assert_eq!(bob_session.decrypt(&message).unwrap(), b"via fallback");

    // Forgetting the old slot closes the window.
    bob.forget_old_fallback_key();
    assert!(matches!(
        Session::new_inbound(&bob, pre_key),
        Err(pawl_olm::OlmError::BadMessageKeyId)
    ));
}

#[test]
fn used_one_time_keys_are_removed_permanently() {
    let (mut rng, _alice, mut bob, mut alice_session) = handshake(110);
    assert_eq!(bob.one_time_keys().curve25519.len(), 1);

    let message = alice_session.encrypt(&mut rng, b"burn after reading").unwrap();
    let OlmMessage::PreKey(pre_key) = &message else { panic!("expected pre-key framing") };

    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    bob.remove_one_time_keys(&bob_session);
    assert!(bob.one_time_keys().curve25519.is_empty());

    // The session still works; a second session from the same message
    // cannot be created any more.
    assert_eq!(bob_session.decrypt(&message).unwrap(), b"burn after reading");
    assert!(matches!(
        Session::new_inbound(&bob, pre_key),
        Err(pawl_olm::OlmError::BadMessageKeyId)
    ));
}

#[test]
fn pickled_sessions_continue_where_they_left_off() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(111);

    let first = alice_session.encrypt(&mut rng, b"before the pickle").unwrap();
    let OlmMessage::PreKey(pre_key) = &first else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    bob_session.decrypt(&first).unwrap();
    let reply = bob_session.encrypt(&mut rng, b"reply").unwrap();
    alice_session.decrypt(&reply).unwrap();

    let pickle = alice_session.pickle(b"session pickle key").unwrap();
    let mut restored = Session::from_pickle(&pickle, b"session pickle key").unwrap();
    assert_eq!(restored.session_id(), alice_session.session_id());
    assert_eq!(restored.has_received_message(), alice_session.has_received_message());
    assert_eq!(restored.describe(), alice_session.describe());

    // Identical state, identical randomness: identical next ciphertext.
    let mut rng_a = rng.clone();
    let mut rng_b = rng.clone();
    let from_original = alice_session.encrypt(&mut rng_a, b"continuation").unwrap();
    let from_restored = restored.encrypt(&mut rng_b, b"continuation").unwrap();
    assert_eq!(from_original.to_base64(), from_restored.to_base64());

    assert_eq!(bob_session.decrypt(&from_restored).unwrap(), b"continuation");
}

#[test]
fn pickle_bit_flips_fail_the_mac() {
    let (_, _alice, _bob, alice_session) = handshake(112);
    let pickle = alice_session.pickle(b"key").unwrap();

    let mut blob = pawl_crypto::base64_decode(&pickle).unwrap();
    blob[10] ^= 0x20;
    let corrupted = pawl_crypto::base64_encode(&blob);
    assert!(matches!(
        Session::from_pickle(&corrupted, b"key"),
        Err(pawl_olm::OlmError::Crypto(pawl_crypto::CryptoError::Mac))
    ));
}

#[test]
fn describe_names_the_ratchet_position_only() {
    let (mut rng, _alice, bob, mut alice_session) = handshake(113);
    let first = alice_session.encrypt(&mut rng, b"msg").unwrap();
    let OlmMessage::PreKey(pre_key) = &first else { panic!("expected pre-key framing") };
    let mut bob_session = Session::new_inbound(&bob, pre_key).unwrap();
    bob_session.decrypt(&first).unwrap();

    let description = bob_session.describe();
    assert!(description.contains("receiver chain indices: [1]"), "{description}");
    assert!(description.contains("received message: true"), "{description}");
}
