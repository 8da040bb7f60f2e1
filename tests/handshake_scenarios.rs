// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! End-to-end scenarios driving the full handshake/negotiation/session
//! stack through [`NegotiatingTransport`] over an in-memory transport.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tox_secure_transport::clock::{Clock, FakeClock};
use tox_secure_transport::error::CoreError;
use tox_secure_transport::facade::NegotiatingTransport;
use tox_secure_transport::negotiation::{commitment, NegotiationError, ProtocolCapabilities};
use tox_secure_transport::router::PacketSessionRouter;
use tox_secure_transport::session::{noise, ProtocolVersion, SessionCore};
use tox_secure_transport::transport::Transport;

use support::duplex_pair;

const APP_PACKET_TYPE: u8 = 10;

fn noise_keypair() -> ([u8; 32], [u8; 32]) {
    let kp = snow::Builder::new("Noise_IK_25519_ChaChaPoly_SHA256".parse().unwrap())
        .generate_keypair()
        .unwrap();
    let mut private = [0u8; 32];
    let mut public = [0u8; 32];
    private.copy_from_slice(&kp.private);
    public.copy_from_slice(&kp.public);
    (private, public)
}

fn build_facade(
    transport: Arc<support::DuplexTransport>,
    local_private: [u8; 32],
    local_public: [u8; 32],
) -> (Arc<NegotiatingTransport>, Arc<PacketSessionRouter>) {
    let session_core = Arc::new(SessionCore::new(local_private, FakeClock::new(1_700_000_000)));
    let router = Arc::new(PacketSessionRouter::new());
    let facade = Arc::new(NegotiatingTransport::new(
        transport,
        None,
        session_core,
        router.clone(),
        ProtocolCapabilities::default(),
        FakeClock::new(1_700_000_000),
        local_public,
    ));
    (facade, router)
}

fn wire_handler(facade: Arc<NegotiatingTransport>) -> tox_secure_transport::transport::PacketHandler {
    Arc::new(move |endpoint, bytes| {
        facade.handle_inbound(endpoint, bytes);
    })
}

#[tokio::test]
async fn s1_handshake_and_commitment_succeed() {
    support::init_tracing();
    let (transport_a, transport_b) = duplex_pair("peer-a", "peer-b");
    let (priv_a, pub_a) = noise_keypair();
    let (priv_b, pub_b) = noise_keypair();

    let (facade_a, _router_a) = build_facade(transport_a.clone(), priv_a, pub_a);
    let (facade_b, _router_b) = build_facade(transport_b.clone(), priv_b, pub_b);

    transport_a.register_handler(wire_handler(facade_a.clone()));
    transport_b.register_handler(wire_handler(facade_b.clone()));

    let endpoint_b = transport_b.local_endpoint().unwrap();
    facade_a.connect(pub_b, endpoint_b).await.unwrap();

    assert_eq!(facade_a.get_peer_version(&pub_b), Some(ProtocolVersion::NOISE_IK));
}

#[tokio::test]
async fn s1b_both_sides_independently_verify_the_others_commitment() {
    support::init_tracing();
    let (transport_a, transport_b) = duplex_pair("peer-a", "peer-b");
    let (priv_a, pub_a) = noise_keypair();
    let (priv_b, pub_b) = noise_keypair();

    let (facade_a, _router_a) = build_facade(transport_a.clone(), priv_a, pub_a);
    let (facade_b, _router_b) = build_facade(transport_b.clone(), priv_b, pub_b);

    transport_a.register_handler(wire_handler(facade_a.clone()));
    transport_b.register_handler(wire_handler(facade_b.clone()));

    let endpoint_b = transport_b.local_endpoint().unwrap();
    facade_a.connect(pub_b, endpoint_b).await.unwrap();
    // `a` only returns from `connect` once it has verified `b`'s commitment
    // itself; give `b`'s spawned inbound task a turn to process `a`'s
    // commitment, sent as the third, post-handshake message.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(facade_a.is_peer_verified(&pub_b), "initiator must verify the responder's commitment");
    assert!(facade_b.is_peer_verified(&pub_a), "responder must verify the initiator's commitment");
}

#[tokio::test]
async fn s4_replay_is_rejected_end_to_end() {
    support::init_tracing();
    let (transport_a, transport_b) = duplex_pair("peer-a", "peer-b");
    let (priv_a, pub_a) = noise_keypair();
    let (priv_b, pub_b) = noise_keypair();

    let (facade_a, _router_a) = build_facade(transport_a.clone(), priv_a, pub_a);
    let (facade_b, router_b) = build_facade(transport_b.clone(), priv_b, pub_b);

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_clone = delivered.clone();

    // Wrap b's handler so we can also capture the raw wire bytes for replay.
    let captured: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let captured_clone = captured.clone();
    let facade_b_for_handler = facade_b.clone();
    transport_b.register_handler(Arc::new(move |endpoint, bytes| {
        captured_clone.lock().unwrap().push(bytes.clone());
        facade_b_for_handler.handle_inbound(endpoint, bytes);
    }));
    transport_a.register_handler(wire_handler(facade_a.clone()));

    let endpoint_b = transport_b.local_endpoint().unwrap();
    facade_a.connect(pub_b, endpoint_b.clone()).await.unwrap();
    // `connect` returns once `a` has verified `b`'s commitment and sent its
    // own; give `b`'s spawned inbound task a turn to process that commitment
    // and mark its own session verified before any application traffic.
    tokio::time::sleep(Duration::from_millis(20)).await;

    router_b.register_handler(
        APP_PACKET_TYPE,
        Arc::new(move |_peer, _payload| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );

    facade_a.send(&pub_b, APP_PACKET_TYPE, b"hello once").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    let wire = captured.lock().unwrap().last().cloned().unwrap();
    facade_b.handle_inbound(endpoint_b, wire);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1, "replayed message must not reach the handler twice");
}

#[tokio::test]
async fn s6_negotiation_times_out_when_the_peer_never_replies() {
    support::init_tracing();
    let (transport_a, transport_b) = duplex_pair("peer-a", "peer-b");
    let (priv_a, pub_a) = noise_keypair();
    let (_priv_b, pub_b) = noise_keypair();

    let session_core = Arc::new(SessionCore::new(priv_a, FakeClock::new(1_700_000_000)));
    let router = Arc::new(PacketSessionRouter::new());
    let mut capabilities = ProtocolCapabilities::default();
    capabilities.negotiation_timeout = Duration::from_millis(30);
    let facade_a = Arc::new(NegotiatingTransport::new(
        transport_a.clone(),
        None,
        session_core,
        router,
        capabilities,
        FakeClock::new(1_700_000_000),
        pub_a,
    ));
    transport_a.register_handler(wire_handler(facade_a.clone()));

    // peer b accepts bytes but never processes or replies to them.
    transport_b.register_handler(Arc::new(|_endpoint, _bytes| {}));

    let endpoint_b = transport_b.local_endpoint().unwrap();
    let result = facade_a.connect(pub_b, endpoint_b).await;
    assert!(matches!(
        result,
        Err(CoreError::Negotiation(NegotiationError::NegotiationTimeout(_)))
    ));
}

#[test]
fn s2_downgrade_attempt_is_caught_by_commitment_mismatch() {
    let clock = FakeClock::new(1_700_000_000);
    let (init_priv, _init_pub) = noise_keypair();
    let (resp_priv, resp_pub) = noise_keypair();

    let initiator_core = SessionCore::new(init_priv, clock.clone());
    let responder_core = SessionCore::new(resp_priv, clock.clone());

    let (init_session, flight1) = initiator_core.initiate(resp_pub).unwrap();
    let resp_session = responder_core.accept(&flight1).unwrap();

    // The responder was fooled by a tampered cleartext negotiation hello into
    // believing only the legacy version was on offer, and builds its
    // commitment for that version.
    let transcript = responder_core.pending_accept_transcript(resp_session).unwrap();
    let downgraded_commitment = commitment::build(&transcript, ProtocolVersion::LEGACY.0, clock.unix_seconds());
    let flight2 = responder_core
        .accept_write_flight2(resp_session, &downgraded_commitment, ProtocolVersion::NOISE_IK)
        .unwrap();

    // The initiator was never fooled and still expects NOISE_IK.
    let initiator_transcript = initiator_core.pending_initiation_transcript(init_session).unwrap();
    let received_commitment = initiator_core
        .complete_initiator(init_session, &flight2, ProtocolVersion::NOISE_IK)
        .unwrap();

    let verdict = commitment::verify(
        &initiator_transcript,
        ProtocolVersion::NOISE_IK.0,
        clock.unix_seconds(),
        &received_commitment,
    );
    assert_eq!(verdict.unwrap_err(), commitment::CommitmentError::Mismatch);
}

#[test]
fn s3_commitment_corruption_after_a_real_handshake_is_rejected() {
    let clock = FakeClock::new(1_700_000_000);
    let (init_priv, _init_pub) = noise_keypair();
    let (resp_priv, resp_pub) = noise_keypair();

    let initiator_core = SessionCore::new(init_priv, clock.clone());
    let responder_core = SessionCore::new(resp_priv, clock.clone());

    let (init_session, flight1) = initiator_core.initiate(resp_pub).unwrap();
    let resp_session = responder_core.accept(&flight1).unwrap();
    let transcript = responder_core.pending_accept_transcript(resp_session).unwrap();
    let valid_commitment = commitment::build(&transcript, ProtocolVersion::NOISE_IK.0, clock.unix_seconds());
    let flight2 = responder_core
        .accept_write_flight2(resp_session, &valid_commitment, ProtocolVersion::NOISE_IK)
        .unwrap();

    let initiator_transcript = initiator_core.pending_initiation_transcript(init_session).unwrap();
    let mut received_commitment = initiator_core
        .complete_initiator(init_session, &flight2, ProtocolVersion::NOISE_IK)
        .unwrap();
    // Simulate corruption of the already-decrypted commitment payload.
    *received_commitment.last_mut().unwrap() ^= 0x01;

    let verdict = commitment::verify(
        &initiator_transcript,
        ProtocolVersion::NOISE_IK.0,
        clock.unix_seconds(),
        &received_commitment,
    );
    assert_eq!(verdict.unwrap_err(), commitment::CommitmentError::MacInvalid);
}

#[test]
fn noise_transport_round_trip_still_holds_independent_of_the_facade() {
    let (priv_a, _pub_a) = noise_keypair();
    let (priv_b, pub_b) = noise_keypair();
    let mut initiator = noise::build_initiator(&priv_a, &pub_b).unwrap();
    let mut responder = noise::build_responder(&priv_b).unwrap();

    let flight1 = noise::write_flight(&mut initiator, b"").unwrap();
    noise::read_flight(&mut responder, &flight1).unwrap();
    let flight2 = noise::write_flight(&mut responder, b"ack").unwrap();
    let payload = noise::read_flight(&mut initiator, &flight2).unwrap();
    assert_eq!(payload, b"ack");
}
