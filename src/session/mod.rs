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

//! Session lifecycle: handshake driving, idle sweeping, and encrypt/decrypt
//! with replay protection (spec §3, §4.2, §4.3, §5).

pub mod noise;
pub mod replay;

use crate::clock::SharedClock;
use replay::ReplayWindow;
use snow::{HandshakeState, StatelessTransportState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A negotiated protocol version, `0` meaning the plaintext legacy wire
/// format and any nonzero value an encrypted Noise-IK generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub u8);

impl ProtocolVersion {
    /// Pre-Noise plaintext wire format, kept only for negotiation fallback.
    pub const LEGACY: ProtocolVersion = ProtocolVersion(0);
    /// The Noise-IK secured generation this crate implements.
    pub const NOISE_IK: ProtocolVersion = ProtocolVersion(1);
}

/// Default idle timeout before a session is swept (spec §4.3): five minutes.
pub const DEFAULT_IDLE_TIMEOUT_MILLIS: u64 = 5 * 60 * 1000;

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying Noise handshake failed or produced invalid framing.
    #[error("handshake error: {0}")]
    Handshake(#[from] noise::NoiseError),
    /// No pending initiation exists for the given session id.
    #[error("no pending initiation for session {0}")]
    NoPendingInitiation(u32),
    /// No established session exists for the given session id.
    #[error("no session {0}")]
    NotFound(u32),
    /// A message's counter was rejected by the replay window.
    #[error("replay rejected for session {0}")]
    ReplayRejected(u32),
    /// The session's bidirectional version commitment has not verified yet;
    /// application traffic is refused until it has (spec §4.4).
    #[error("session {0} has not completed commitment verification")]
    NotVerified(u32),
}

/// An established, post-handshake secure session.
///
/// `verified` gates everything but the commitment bootstrap message itself:
/// a session starts distrusted on both sides and only becomes usable for
/// application traffic once this side has independently verified the peer's
/// version commitment (spec §3 invariant (b), §4.4).
pub struct Session {
    peer_static_key: [u8; 32],
    transport: StatelessTransportState,
    version: ProtocolVersion,
    send_counter: AtomicU64,
    replay: Mutex<ReplayWindow>,
    last_activity_millis: AtomicU64,
    transcript_hash: [u8; 32],
    verified: AtomicBool,
}

impl Session {
    /// The peer's Noise static public key.
    pub fn peer_static_key(&self) -> &[u8; 32] {
        &self.peer_static_key
    }

    /// The protocol version this session negotiated.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Whether this side has verified the peer's version commitment yet.
    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::SeqCst)
    }
}

struct PendingInitiation {
    handshake: HandshakeState,
    peer_static_key: [u8; 32],
}

struct PendingAccept {
    handshake: HandshakeState,
}

struct Inner {
    sessions: HashMap<u32, Arc<Session>>,
    peer_to_session: HashMap<[u8; 32], u32>,
    pending_initiations: HashMap<u32, PendingInitiation>,
    pending_accepts: HashMap<u32, PendingAccept>,
    next_session_id: u32,
}

/// Drives handshakes and owns every established [`Session`].
///
/// Lookups take the single map-level lock only long enough to clone the
/// `Arc<Session>` out of the table (spec §5): the Noise AEAD operation and
/// the per-session replay check that follow run against that clone, so one
/// session's encrypt/decrypt never blocks another's on the map lock. The
/// per-session state that does need serializing (the replay window) has its
/// own `Mutex` scoped to just that session, the second of the two tiers
/// spec §5 describes.
pub struct SessionCore {
    local_private: [u8; 32],
    clock: SharedClock,
    inner: Mutex<Inner>,
    on_remove: Mutex<Option<Box<dyn Fn(u32) + Send + Sync>>>,
}

impl SessionCore {
    /// Construct a session core bound to the local Noise static private key.
    pub fn new(local_private: [u8; 32], clock: SharedClock) -> Self {
        Self {
            local_private,
            clock,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                peer_to_session: HashMap::new(),
                pending_initiations: HashMap::new(),
                pending_accepts: HashMap::new(),
                next_session_id: 1,
            }),
            on_remove: Mutex::new(None),
        }
    }

    /// Install a callback invoked with a session id whenever `remove` or
    /// `sweep_idle` drops it, so a caller (the facade's router) can keep its
    /// own session-id bookkeeping in sync without this module depending on
    /// the router type.
    pub fn set_on_remove(&self, callback: impl Fn(u32) + Send + Sync + 'static) {
        *self.on_remove.lock().expect("on_remove mutex poisoned") = Some(Box::new(callback));
    }

    fn notify_removed(&self, session_id: u32) {
        if let Some(callback) = self.on_remove.lock().expect("on_remove mutex poisoned").as_ref() {
            callback(session_id);
        }
    }

    fn alloc_session_id(inner: &mut Inner) -> u32 {
        loop {
            let id = inner.next_session_id;
            inner.next_session_id = inner.next_session_id.wrapping_add(1).max(1);
            if !inner.sessions.contains_key(&id) && !inner.pending_initiations.contains_key(&id) {
                return id;
            }
        }
    }

    /// Start a handshake toward `peer_static_key` as initiator. Returns the
    /// session id to track the pending initiation and the first flight's
    /// raw Noise bytes (wrap in a [`crate::codec::envelope::HandshakeEnvelope`]
    /// before sending).
    pub fn initiate(&self, peer_static_key: [u8; 32]) -> Result<(u32, Vec<u8>), SessionError> {
        let mut handshake = noise::build_initiator(&self.local_private, &peer_static_key)?;
        let flight1 = noise::write_flight(&mut handshake, b"")?;

        let mut inner = self.inner.lock().expect("session core mutex poisoned");
        let session_id = Self::alloc_session_id(&mut inner);
        inner.pending_initiations.insert(
            session_id,
            PendingInitiation {
                handshake,
                peer_static_key,
            },
        );
        Ok((session_id, flight1))
    }

    /// Complete a handshake as initiator after receiving flight 2. Returns
    /// the piggybacked payload (the encrypted version commitment) so the
    /// negotiation layer can verify it before the session is trusted.
    pub fn complete_initiator(
        &self,
        session_id: u32,
        flight2: &[u8],
        version: ProtocolVersion,
    ) -> Result<Vec<u8>, SessionError> {
        let mut inner = self.inner.lock().expect("session core mutex poisoned");
        let mut pending = inner
            .pending_initiations
            .remove(&session_id)
            .ok_or(SessionError::NoPendingInitiation(session_id))?;

        let payload = noise::read_flight(&mut pending.handshake, flight2)?;
        let transcript_hash = noise::transcript_hash(&pending.handshake);
        let transport = noise::into_transport(pending.handshake)?;

        let session = Arc::new(Session {
            peer_static_key: pending.peer_static_key,
            transport,
            version,
            send_counter: AtomicU64::new(0),
            replay: Mutex::new(ReplayWindow::new()),
            last_activity_millis: AtomicU64::new(self.clock.monotonic_millis()),
            transcript_hash,
            verified: AtomicBool::new(false),
        });
        inner.peer_to_session.insert(pending.peer_static_key, session_id);
        inner.sessions.insert(session_id, session);
        Ok(payload)
    }

    /// Accept an initiator's first flight as responder. Returns the session
    /// id (to echo back as the handshake session id) and the handshake
    /// state needed to produce flight 2 via [`Self::accept_write_flight2`].
    pub fn accept(&self, flight1: &[u8]) -> Result<u32, SessionError> {
        let mut handshake = noise::build_responder(&self.local_private)?;
        noise::read_flight(&mut handshake, flight1)?;

        let mut inner = self.inner.lock().expect("session core mutex poisoned");
        let session_id = Self::alloc_session_id(&mut inner);
        inner
            .pending_accepts
            .insert(session_id, PendingAccept { handshake });
        Ok(session_id)
    }

    /// Write flight 2 (with the encrypted version-commitment payload
    /// piggybacked) and finalize the responder-side session.
    pub fn accept_write_flight2(
        &self,
        session_id: u32,
        commitment_payload: &[u8],
        version: ProtocolVersion,
    ) -> Result<Vec<u8>, SessionError> {
        let mut inner = self.inner.lock().expect("session core mutex poisoned");
        let mut pending = inner
            .pending_accepts
            .remove(&session_id)
            .ok_or(SessionError::NoPendingInitiation(session_id))?;

        let flight2 = noise::write_flight(&mut pending.handshake, commitment_payload)?;
        let peer_static_key =
            noise::remote_static(&pending.handshake).ok_or(SessionError::NoPendingInitiation(session_id))?;
        let transcript_hash = noise::transcript_hash(&pending.handshake);
        let transport = noise::into_transport(pending.handshake)?;

        let session = Arc::new(Session {
            peer_static_key,
            transport,
            version,
            send_counter: AtomicU64::new(0),
            replay: Mutex::new(ReplayWindow::new()),
            last_activity_millis: AtomicU64::new(self.clock.monotonic_millis()),
            transcript_hash,
            verified: AtomicBool::new(false),
        });
        inner.peer_to_session.insert(peer_static_key, session_id);
        inner.sessions.insert(session_id, session);
        Ok(flight2)
    }

    /// The transcript hash of an already-established session, for building
    /// or verifying the post-handshake commitment bootstrap message.
    pub fn transcript_hash(&self, session_id: u32) -> Result<[u8; 32], SessionError> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        inner
            .sessions
            .get(&session_id)
            .map(|s| s.transcript_hash)
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Whether `session_id` has completed commitment verification on this side.
    pub fn is_verified(&self, session_id: u32) -> Result<bool, SessionError> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        inner
            .sessions
            .get(&session_id)
            .map(|s| s.is_verified())
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Mark `session_id` as having verified the peer's commitment, opening
    /// the gate on `encrypt`/`decrypt`.
    pub fn mark_verified(&self, session_id: u32) -> Result<(), SessionError> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        let session = inner
            .sessions
            .get(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.verified.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// The transcript hash of a still-pending initiation, for commitment
    /// construction on the initiator side before `complete_initiator`.
    pub fn pending_initiation_transcript(&self, session_id: u32) -> Result<[u8; 32], SessionError> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        let pending = inner
            .pending_initiations
            .get(&session_id)
            .ok_or(SessionError::NoPendingInitiation(session_id))?;
        Ok(noise::transcript_hash(&pending.handshake))
    }

    /// The transcript hash of a still-pending accept, for commitment
    /// construction on the responder side before `accept_write_flight2`.
    pub fn pending_accept_transcript(&self, session_id: u32) -> Result<[u8; 32], SessionError> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        let pending = inner
            .pending_accepts
            .get(&session_id)
            .ok_or(SessionError::NoPendingInitiation(session_id))?;
        Ok(noise::transcript_hash(&pending.handshake))
    }

    fn session_arc(&self, session_id: u32) -> Result<Arc<Session>, SessionError> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        inner
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Encrypt `plaintext` for `session_id`, advancing its send counter.
    /// Refuses sessions that have not completed commitment verification
    /// (spec §4.4); use [`Self::encrypt_raw`] for the commitment bootstrap
    /// message itself.
    pub fn encrypt(&self, session_id: u32, plaintext: &[u8]) -> Result<(u64, Vec<u8>), SessionError> {
        let session = self.session_arc(session_id)?;
        if !session.is_verified() {
            return Err(SessionError::NotVerified(session_id));
        }
        self.encrypt_raw(session_id, plaintext)
    }

    /// Decrypt `ciphertext` received with explicit counter `n`, rejecting
    /// replays via the session's [`ReplayWindow`]. Refuses sessions that
    /// have not completed commitment verification; use
    /// [`Self::decrypt_raw`] for the commitment bootstrap message itself.
    pub fn decrypt(&self, session_id: u32, n: u64, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let session = self.session_arc(session_id)?;
        if !session.is_verified() {
            return Err(SessionError::NotVerified(session_id));
        }
        self.decrypt_raw(session_id, n, ciphertext)
    }

    /// Encrypt `plaintext` for `session_id` without the verification gate.
    /// Only the commitment bootstrap exchange should call this directly.
    pub fn encrypt_raw(&self, session_id: u32, plaintext: &[u8]) -> Result<(u64, Vec<u8>), SessionError> {
        let session = self.session_arc(session_id)?;
        let n = session.send_counter.fetch_add(1, Ordering::SeqCst);
        let ciphertext = noise::encrypt(&session.transport, n, plaintext)?;
        session
            .last_activity_millis
            .store(self.clock.monotonic_millis(), Ordering::SeqCst);
        Ok((n, ciphertext))
    }

    /// Decrypt `ciphertext` for `session_id` without the verification gate.
    /// Only the commitment bootstrap exchange should call this directly.
    pub fn decrypt_raw(&self, session_id: u32, n: u64, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let session = self.session_arc(session_id)?;

        {
            let mut replay = session.replay.lock().expect("replay window mutex poisoned");
            if !replay.admit(n) {
                return Err(SessionError::ReplayRejected(session_id));
            }
        }

        let plaintext = noise::decrypt(&session.transport, n, ciphertext)?;
        session
            .last_activity_millis
            .store(self.clock.monotonic_millis(), Ordering::SeqCst);
        Ok(plaintext)
    }

    /// The session id for an already-established session with `peer_static_key`.
    pub fn get_by_peer(&self, peer_static_key: &[u8; 32]) -> Option<u32> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        inner.peer_to_session.get(peer_static_key).copied()
    }

    /// The peer static key owning `session_id`, if the session exists.
    pub fn peer_for_session(&self, session_id: u32) -> Option<[u8; 32]> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        inner.sessions.get(&session_id).map(|s| s.peer_static_key)
    }

    /// The protocol version a session negotiated.
    pub fn supports(&self, session_id: u32) -> Option<ProtocolVersion> {
        let inner = self.inner.lock().expect("session core mutex poisoned");
        inner.sessions.get(&session_id).map(|s| s.version)
    }

    /// Remove a session (on teardown, superseding renegotiation, or a
    /// failed commitment verification), invoking the `on_remove` callback
    /// (if one is set) so router-level bookkeeping stays in sync.
    pub fn remove(&self, session_id: u32) {
        let removed = {
            let mut inner = self.inner.lock().expect("session core mutex poisoned");
            if let Some(session) = inner.sessions.remove(&session_id) {
                inner.peer_to_session.remove(&session.peer_static_key);
                true
            } else {
                false
            }
        };
        if removed {
            self.notify_removed(session_id);
        }
    }

    /// Remove every session idle longer than `idle_timeout_millis`,
    /// returning the removed session ids (spec §5: idle sweep must not
    /// race a concurrent send/receive on the same session). Invokes the
    /// `on_remove` callback for each one once the map lock is released.
    pub fn sweep_idle(&self, idle_timeout_millis: u64) -> Vec<u32> {
        let now = self.clock.monotonic_millis();
        let mut inner = self.inner.lock().expect("session core mutex poisoned");
        let is_stale = |s: &Session| {
            now.saturating_sub(s.last_activity_millis.load(Ordering::SeqCst)) >= idle_timeout_millis
        };
        let candidates: Vec<u32> = inner
            .sessions
            .iter()
            .filter(|(_, s)| is_stale(s))
            .map(|(id, _)| *id)
            .collect();
        // Re-check each candidate's activity right before removing it: a
        // decrypt running concurrently with this sweep may have bumped
        // `last_activity` after the collect pass above but without ever
        // holding this map lock, so the candidate set alone isn't authoritative.
        let mut removed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if inner.sessions.get(&id).map(|s| is_stale(s)) == Some(true) {
                if let Some(session) = inner.sessions.remove(&id) {
                    inner.peer_to_session.remove(&session.peer_static_key);
                    removed.push(id);
                }
            }
        }
        drop(inner);
        for id in &removed {
            self.notify_removed(*id);
        }
        removed
    }
}
