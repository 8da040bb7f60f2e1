// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Maps inbound packets to the right session and the right handler (spec
//! §4.1, §4.3): `session_id -> peer_static_key` for decrypt routing, and
//! `packet_type -> handler` for dispatch once decrypted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Invoked with the decrypted application payload and the sending peer's
/// static key.
pub type PacketTypeHandler = Arc<dyn Fn([u8; 32], Vec<u8>) + Send + Sync>;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No handler is registered for this packet type.
    #[error("no handler registered for packet type {0}")]
    NoHandler(u8),
    /// No session is registered under this session id.
    #[error("unknown session id {0}")]
    UnknownSession(u32),
}

/// Routes decrypted packets to per-type handlers and tracks which peer owns
/// each live session id.
#[derive(Default)]
pub struct PacketSessionRouter {
    session_to_peer: RwLock<HashMap<u32, [u8; 32]>>,
    handlers: RwLock<HashMap<u8, PacketTypeHandler>>,
}

impl PacketSessionRouter {
    /// Construct an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `session_id` belongs to `peer_static_key`, called once a
    /// handshake completes.
    pub fn add_session(&self, session_id: u32, peer_static_key: [u8; 32]) {
        self.session_to_peer
            .write()
            .expect("router session map poisoned")
            .insert(session_id, peer_static_key);
    }

    /// Forget a session, called on teardown or idle sweep. Removal always
    /// happens under the same lock acquisition as the map write, so a
    /// concurrent `route` either sees the session or sees it gone, never a
    /// half-removed entry.
    pub fn remove_session(&self, session_id: u32) {
        self.session_to_peer
            .write()
            .expect("router session map poisoned")
            .remove(&session_id);
    }

    /// Register the handler for `packet_type`, replacing any previous one.
    pub fn register_handler(&self, packet_type: u8, handler: PacketTypeHandler) {
        self.handlers
            .write()
            .expect("router handler map poisoned")
            .insert(packet_type, handler);
    }

    /// Look up the peer that owns `session_id`.
    pub fn peer_for_session(&self, session_id: u32) -> Result<[u8; 32], RouterError> {
        self.session_to_peer
            .read()
            .expect("router session map poisoned")
            .get(&session_id)
            .copied()
            .ok_or(RouterError::UnknownSession(session_id))
    }

    /// Dispatch a decrypted `payload` for `session_id` to the handler
    /// registered for `packet_type`.
    pub fn route(&self, session_id: u32, packet_type: u8, payload: Vec<u8>) -> Result<(), RouterError> {
        let peer = self.peer_for_session(session_id)?;
        let handler = self
            .handlers
            .read()
            .expect("router handler map poisoned")
            .get(&packet_type)
            .cloned()
            .ok_or(RouterError::NoHandler(packet_type))?;
        handler(peer, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn routes_to_the_handler_for_the_packet_type() {
        let router = PacketSessionRouter::new();
        router.add_session(1, [9u8; 32]);

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        router.register_handler(
            5,
            Arc::new(move |peer, payload| {
                *seen_clone.lock().unwrap() = Some((peer, payload));
            }),
        );

        router.route(1, 5, b"hi".to_vec()).unwrap();
        let (peer, payload) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(peer, [9u8; 32]);
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn route_fails_for_unknown_session() {
        let router = PacketSessionRouter::new();
        assert!(matches!(
            router.route(1, 5, vec![]),
            Err(RouterError::UnknownSession(1))
        ));
    }

    #[test]
    fn route_fails_for_unregistered_packet_type() {
        let router = PacketSessionRouter::new();
        router.add_session(1, [1u8; 32]);
        assert!(matches!(
            router.route(1, 5, vec![]),
            Err(RouterError::NoHandler(5))
        ));
    }

    #[test]
    fn removed_session_is_no_longer_routable() {
        let router = PacketSessionRouter::new();
        router.add_session(1, [1u8; 32]);
        router.remove_session(1);
        assert!(matches!(
            router.peer_for_session(1),
            Err(RouterError::UnknownSession(1))
        ));
    }
}
