// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! In-memory duplex transport double: two endpoints wired directly
//! together by a shared handler slot, for scenario tests that need a
//! [`Transport`] without opening real sockets.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tox_secure_transport::endpoint::{Capability, Endpoint};
use tox_secure_transport::transport::{PacketHandler, Transport, TransportError};

type HandlerSlot = Arc<Mutex<Option<PacketHandler>>>;

/// Install a `tracing` subscriber printing to stdout for the duration of
/// the test run, so the crate's `debug!`/`warn!` events are visible with
/// `cargo test -- --nocapture`. Safe to call from multiple tests; only the
/// first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One end of an in-memory duplex pair. `send` invokes whatever handler is
/// registered on the peer end directly, synchronously.
pub struct DuplexTransport {
    local: Endpoint,
    own_handler: HandlerSlot,
    peer_handler: HandlerSlot,
}

/// Build two ends of an in-memory duplex transport, `a` and `b`, each
/// addressed by a synthetic name. Register handlers on both before sending.
pub fn duplex_pair(name_a: &str, name_b: &str) -> (Arc<DuplexTransport>, Arc<DuplexTransport>) {
    let a_slot: HandlerSlot = Arc::new(Mutex::new(None));
    let b_slot: HandlerSlot = Arc::new(Mutex::new(None));

    let a = Arc::new(DuplexTransport {
        local: Endpoint::proxied_stream(name_a.to_string(), Capability::direct()),
        own_handler: a_slot.clone(),
        peer_handler: b_slot.clone(),
    });
    let b = Arc::new(DuplexTransport {
        local: Endpoint::proxied_stream(name_b.to_string(), Capability::direct()),
        own_handler: b_slot,
        peer_handler: a_slot,
    });

    (a, b)
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, _endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        let handler = self.peer_handler.lock().expect("duplex handler mutex poisoned").clone();
        match handler {
            Some(handler) => {
                handler(self.local.clone(), bytes.to_vec());
                Ok(())
            }
            None => Err(TransportError::Unreachable("peer has no handler registered".into())),
        }
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        Some(self.local.clone())
    }

    fn register_handler(&self, handler: PacketHandler) {
        *self.own_handler.lock().expect("duplex handler mutex poisoned") = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        *self.own_handler.lock().expect("duplex handler mutex poisoned") = None;
        Ok(())
    }
}
