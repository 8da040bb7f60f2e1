// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! End-to-end scenario driving [`RelayClient`] through a minimal relay
//! server double built from a bare [`StreamTransport`], exercising the
//! register/data frame round trip after the dial-addressing fix (spec
//! §4.7).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tox_secure_transport::relay::{RelayClient, RelayServer};
use tox_secure_transport::transport::stream::StreamTransport;
use tox_secure_transport::transport::Transport;

mod support;

const FRAME_REGISTER: u8 = 1;
const FRAME_REGISTER_ACK: u8 = 2;
const FRAME_DATA: u8 = 3;

fn frame(frame_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(frame_type);
    out.extend_from_slice(body);
    out
}

/// A minimal stand-in for a relay server: registers clients by public key
/// and forwards `FRAME_DATA` frames between them, mirroring the framing
/// `RelayClient` speaks without implementing a real relay's trust/routing
/// policy.
fn spawn_relay_server(transport: Arc<StreamTransport>) {
    let registered: Arc<Mutex<HashMap<[u8; 32], tox_secure_transport::endpoint::Endpoint>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let transport_for_handler = transport.clone();
    transport.register_handler(Arc::new(move |from, bytes| {
        let Some((&frame_type, body)) = bytes.split_first() else { return };
        match frame_type {
            FRAME_REGISTER => {
                if body.len() != 32 {
                    return;
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(body);
                registered.lock().unwrap().insert(key, from.clone());
                let transport = transport_for_handler.clone();
                let from = from.clone();
                tokio::spawn(async move {
                    let _ = transport.send_or_connect(&from, &frame(FRAME_REGISTER_ACK, &[])).await;
                });
            }
            FRAME_DATA => {
                if body.len() < 32 {
                    return;
                }
                let mut target = [0u8; 32];
                target.copy_from_slice(&body[..32]);
                let payload = &body[32..];
                let Some(target_endpoint) = registered.lock().unwrap().get(&target).cloned() else {
                    return;
                };
                // Relay re-sources the frame under the sender's own
                // registered key so the recipient learns who it is from.
                let sender_key = registered
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|(_, ep)| **ep == from)
                    .map(|(k, _)| *k);
                let Some(sender_key) = sender_key else { return };
                let mut relayed_body = Vec::with_capacity(32 + payload.len());
                relayed_body.extend_from_slice(&sender_key);
                relayed_body.extend_from_slice(payload);
                let transport = transport_for_handler.clone();
                tokio::spawn(async move {
                    let _ = transport
                        .send_or_connect(&target_endpoint, &frame(FRAME_DATA, &relayed_body))
                        .await;
                });
            }
            _ => {}
        }
    }));
}

#[tokio::test]
async fn s5_two_clients_exchange_data_through_a_relay_server() {
    support::init_tracing();
    let server_transport = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let server_addr = server_transport.local_endpoint().unwrap().socket_addr().unwrap();
    spawn_relay_server(server_transport);

    let relay_server = RelayServer {
        address: server_addr,
        public_key: [0u8; 32],
        priority: 0,
    };

    let alice_transport = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let bob_transport = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let alice_key = [1u8; 32];
    let bob_key = [2u8; 32];

    let alice = RelayClient::new(alice_transport.clone(), alice_key, vec![relay_server]);
    let bob = RelayClient::new(bob_transport.clone(), bob_key, vec![relay_server]);

    alice_transport.register_handler(Arc::new({
        let alice = alice.clone();
        move |endpoint, bytes| {
            let Some(from) = endpoint.socket_addr() else { return };
            let _ = alice.handle_incoming_frame(from, &bytes);
        }
    }));
    bob_transport.register_handler(Arc::new({
        let bob = bob.clone();
        move |endpoint, bytes| {
            let Some(from) = endpoint.socket_addr() else { return };
            let _ = bob.handle_incoming_frame(from, &bytes);
        }
    }));

    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    let received = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    bob.register_handler(Arc::new(move |source, payload| {
        *received_clone.lock().unwrap() = Some((source, payload));
    }));

    alice.send_to(bob_key, b"hello through the relay").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (source, payload) = received.lock().unwrap().clone().expect("bob never received the relayed frame");
    assert_eq!(source, alice_key);
    assert_eq!(payload, b"hello through the relay");

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}
