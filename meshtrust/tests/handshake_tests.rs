// Integration tests for the MeshTrust four-message handshake.

use meshtrust::crypto::keys::IdentityKeyPair;
use meshtrust::handshake::messages::HandshakePayload;
use meshtrust::{
    accept_initiator_hello, AuthenticatedSession, CipherSuite, InitiatorHandshake, MeshTrustError,
    ResponderHandshake,
};

struct Negotiation {
    alice: IdentityKeyPair,
    bob: IdentityKeyPair,
    initiator: InitiatorHandshake,
    responder: ResponderHandshake,
}

/// Run both engines up to the point where the initiator's handshake message
/// has been produced.
fn negotiate_until_initiator_message(suites: &[CipherSuite]) -> (Negotiation, HandshakePayload) {
    let alice = IdentityKeyPair::generate();
    let bob = IdentityKeyPair::generate();

    let mut initiator = InitiatorHandshake::new("session-under-test", suites);
    let hello = initiator.generate_initiator_hello().unwrap();

    let (reply, ephemeral) = accept_initiator_hello(&hello, suites).unwrap();
    let mut responder = ResponderHandshake::from_step2(
        "session-under-test",
        hello,
        reply.clone(),
        ephemeral.secret_bytes(),
        ephemeral.public_key_bytes(),
    )
    .unwrap();
    responder.generate_handshake_secrets().unwrap();

    initiator.receive_responder_hello(reply).unwrap();
    initiator.generate_handshake_secrets().unwrap();
    let msg = initiator
        .generate_our_handshake_message(
            &alice.public_key_bytes(),
            &bob.public_key_bytes(),
            "network-1",
            &|data: &[u8]| Ok(alice.sign(data).to_vec()),
        )
        .unwrap();

    (
        Negotiation {
            alice,
            bob,
            initiator,
            responder,
        },
        msg,
    )
}

fn complete(n: &mut Negotiation, msg: HandshakePayload) -> (AuthenticatedSession, AuthenticatedSession) {
    n.responder
        .validate_peer_handshake_message(&msg, &n.alice.public_key_bytes())
        .unwrap();
    let bob = &n.bob;
    let reply = n
        .responder
        .generate_our_handshake_message(&bob.public_key_bytes(), &|data: &[u8]| {
            Ok(bob.sign(data).to_vec())
        })
        .unwrap();
    let responder_session = n.responder.finish().unwrap();

    n.initiator
        .validate_peer_handshake_message(&reply, &n.bob.public_key_bytes())
        .unwrap();
    let initiator_session = n.initiator.finish().unwrap();
    (initiator_session, responder_session)
}

// ── Full handshake ───────────────────────────────────────────────────────

#[test]
fn full_handshake_succeeds_for_every_suite() {
    for suite in CipherSuite::ALL {
        let (mut n, msg) = negotiate_until_initiator_message(&[suite]);
        let (initiator_session, responder_session) = complete(&mut n, msg);

        assert_eq!(initiator_session.session_id(), "session-under-test");
        assert_eq!(responder_session.session_id(), "session-under-test");

        let mac = initiator_session.create_mac(b"header", b"payload");
        responder_session
            .validate_mac(b"header", b"payload", &mac)
            .unwrap();

        let back = responder_session.create_mac(b"header", b"reply");
        initiator_session.validate_mac(b"header", b"reply", &back).unwrap();
    }
}

#[test]
fn responder_learns_initiator_group() {
    let (mut n, msg) = negotiate_until_initiator_message(&CipherSuite::ALL);
    n.responder
        .validate_peer_handshake_message(&msg, &n.alice.public_key_bytes())
        .unwrap();
    assert_eq!(n.responder.peer_group_id(), Some("network-1"));
}

#[test]
fn payload_mac_does_not_validate_under_other_session() {
    let (mut n1, m1) = negotiate_until_initiator_message(&CipherSuite::ALL);
    let (mut n2, m2) = negotiate_until_initiator_message(&CipherSuite::ALL);
    let (a1, _b1) = complete(&mut n1, m1);
    let (_a2, b2) = complete(&mut n2, m2);

    let mac = a1.create_mac(b"header", b"payload");
    assert!(matches!(
        b2.validate_mac(b"header", b"payload", &mac),
        Err(MeshTrustError::MacVerification)
    ));
}

// ── Error cases ──────────────────────────────────────────────────────────

#[test]
fn generate_hello_twice_fails() {
    let mut initiator = InitiatorHandshake::new("sid", &CipherSuite::ALL);
    initiator.generate_initiator_hello().unwrap();
    assert!(matches!(
        initiator.generate_initiator_hello(),
        Err(MeshTrustError::InvalidStateTransition { .. })
    ));
}

#[test]
fn tampered_initiator_message_rejected() {
    let (mut n, mut msg) = negotiate_until_initiator_message(&CipherSuite::ALL);
    msg.sealed[0] ^= 0xFF;
    assert!(n
        .responder
        .validate_peer_handshake_message(&msg, &n.alice.public_key_bytes())
        .is_err());
    assert_eq!(n.responder.state_label(), "Failed");
}

#[test]
fn initiator_message_checked_against_resolved_key() {
    let (mut n, msg) = negotiate_until_initiator_message(&CipherSuite::ALL);
    let impostor = IdentityKeyPair::generate();
    assert!(matches!(
        n.responder
            .validate_peer_handshake_message(&msg, &impostor.public_key_bytes()),
        Err(MeshTrustError::Handshake(_))
    ));
}

#[test]
fn responder_rejects_message_addressed_to_other_key() {
    let (mut n, msg) = negotiate_until_initiator_message(&CipherSuite::ALL);
    n.responder
        .validate_peer_handshake_message(&msg, &n.alice.public_key_bytes())
        .unwrap();
    let other = IdentityKeyPair::generate();
    let result = n
        .responder
        .generate_our_handshake_message(&other.public_key_bytes(), &|data: &[u8]| {
            Ok(other.sign(data).to_vec())
        });
    assert!(matches!(result, Err(MeshTrustError::Handshake(_))));
}

#[test]
fn responder_signature_from_wrong_key_rejected() {
    let (mut n, msg) = negotiate_until_initiator_message(&CipherSuite::ALL);
    n.responder
        .validate_peer_handshake_message(&msg, &n.alice.public_key_bytes())
        .unwrap();
    let forger = IdentityKeyPair::generate();
    let reply = n
        .responder
        .generate_our_handshake_message(&n.bob.public_key_bytes(), &|data: &[u8]| {
            Ok(forger.sign(data).to_vec())
        })
        .unwrap();
    assert!(matches!(
        n.initiator
            .validate_peer_handshake_message(&reply, &n.bob.public_key_bytes()),
        Err(MeshTrustError::SignatureVerification)
    ));
    assert!(n.initiator.finish().is_err());
}

#[test]
fn signing_failure_propagates() {
    let alice = IdentityKeyPair::generate();
    let mut initiator = InitiatorHandshake::new("sid", &CipherSuite::ALL);
    let hello = initiator.generate_initiator_hello().unwrap();
    let (reply, _) = accept_initiator_hello(&hello, &CipherSuite::ALL).unwrap();
    initiator.receive_responder_hello(reply).unwrap();
    initiator.generate_handshake_secrets().unwrap();

    let result = initiator.generate_our_handshake_message(
        &alice.public_key_bytes(),
        &[3u8; 32],
        "g",
        &|_: &[u8]| Err(MeshTrustError::Signing("hsm offline".into())),
    );
    assert!(matches!(result, Err(MeshTrustError::Signing(_))));
}

#[test]
fn responder_finish_requires_own_message() {
    let (mut n, msg) = negotiate_until_initiator_message(&CipherSuite::ALL);
    n.responder
        .validate_peer_handshake_message(&msg, &n.alice.public_key_bytes())
        .unwrap();
    assert!(n.responder.finish().is_err());
    assert_eq!(n.responder.state_label(), "PeerValidated");
}
