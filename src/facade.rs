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

//! The negotiating transport facade (spec §4.1, §4.4): the one send/receive
//! surface callers use. It picks legacy, Noise, or relay delivery per peer
//! based on what was last negotiated, and drives negotiation/handshake
//! replies automatically on the receive path.

use crate::clock::SharedClock;
use crate::codec::{self, envelope, CodecError};
use crate::endpoint::Endpoint;
use crate::error::CoreError;
use crate::negotiation::{self, commitment, NegotiationMessage, PendingNegotiations, ProtocolCapabilities};
use crate::relay::RelayClient;
use crate::router::PacketSessionRouter;
use crate::session::{ProtocolVersion, SessionCore, DEFAULT_IDLE_TIMEOUT_MILLIS};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How often the idle-sweep task runs (spec §4.3: "every 30 s is sufficient").
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct PeerRoute {
    endpoint: Endpoint,
    version: ProtocolVersion,
    /// The peer's own local session id, learned during the handshake
    /// (spec §4.2): each side numbers sessions independently, so a Noise
    /// message must be addressed with the *receiver's* id, never the
    /// sender's own.
    remote_session_id: u32,
}

/// What the responder needs to finish setting up a peer route once the
/// initiator's half of the commitment exchange arrives and verifies;
/// recorded when flight 2 is sent, consumed by [`NegotiatingTransport::handle_commitment`].
struct PendingResponderRoute {
    endpoint: Endpoint,
    remote_session_id: u32,
}

/// Ties the underlay transport, session core, negotiation state, and
/// optional relay client together behind one send/receive surface.
pub struct NegotiatingTransport {
    transport: Arc<dyn Transport>,
    relay: Option<Arc<RelayClient>>,
    session_core: Arc<SessionCore>,
    router: Arc<PacketSessionRouter>,
    pending_negotiations: Arc<PendingNegotiations>,
    capabilities: ProtocolCapabilities,
    clock: SharedClock,
    local_static_public: [u8; 32],
    routes: Mutex<HashMap<[u8; 32], PeerRoute>>,
    pending_responder_routes: Mutex<HashMap<u32, PendingResponderRoute>>,
}

impl NegotiatingTransport {
    /// Construct a facade over an already-running transport and session
    /// core, and start its background idle-sweep task (spec §4.3). The
    /// sweep removes sessions idle past [`crate::session::DEFAULT_IDLE_TIMEOUT_MILLIS`]
    /// and, via the session core's `on_remove` hook, keeps the router's
    /// `session_id -> peer` table from outliving the session it describes.
    pub fn new(
        transport: Arc<dyn Transport>,
        relay: Option<Arc<RelayClient>>,
        session_core: Arc<SessionCore>,
        router: Arc<PacketSessionRouter>,
        capabilities: ProtocolCapabilities,
        clock: SharedClock,
        local_static_public: [u8; 32],
    ) -> Self {
        let router_for_removal = router.clone();
        session_core.set_on_remove(move |session_id| router_for_removal.remove_session(session_id));

        let session_core_for_sweep = session_core.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = session_core_for_sweep.sweep_idle(DEFAULT_IDLE_TIMEOUT_MILLIS);
                if !removed.is_empty() {
                    tracing::debug!(count = removed.len(), "idle sweep removed sessions");
                }
            }
        });

        Self {
            transport,
            relay,
            session_core,
            router,
            pending_negotiations: Arc::new(PendingNegotiations::new()),
            capabilities,
            clock,
            local_static_public,
            routes: Mutex::new(HashMap::new()),
            pending_responder_routes: Mutex::new(HashMap::new()),
        }
    }

    /// Record the protocol version negotiated with `peer` at `endpoint`, and
    /// the peer's own local session id for addressing future Noise messages.
    fn set_peer_route(&self, peer: [u8; 32], endpoint: Endpoint, version: ProtocolVersion, remote_session_id: u32) {
        self.routes.lock().expect("routes mutex poisoned").insert(
            peer,
            PeerRoute {
                endpoint,
                version,
                remote_session_id,
            },
        );
    }

    /// The version last negotiated with `peer`, if any.
    pub fn get_peer_version(&self, peer: &[u8; 32]) -> Option<ProtocolVersion> {
        self.routes
            .lock()
            .expect("routes mutex poisoned")
            .get(peer)
            .map(|r| r.version)
    }

    /// This node's own Noise static public key.
    pub fn local_static_public(&self) -> [u8; 32] {
        self.local_static_public
    }

    /// Whether the session with `peer`, if any, has completed the
    /// bidirectional commitment exchange (spec §4.4) and is trusted for
    /// application traffic.
    pub fn is_peer_verified(&self, peer: &[u8; 32]) -> bool {
        self.session_core
            .get_by_peer(peer)
            .map(|id| self.session_core.is_verified(id).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Send `payload` under `packet_type` to `peer`. Uses the established
    /// Noise session if one exists; otherwise sends the legacy cleartext
    /// framing, which only version-0 peers should ever receive.
    pub async fn send(&self, peer: &[u8; 32], packet_type: u8, payload: &[u8]) -> Result<(), CoreError> {
        let (endpoint, remote_session_id) = {
            let routes = self.routes.lock().expect("routes mutex poisoned");
            routes.get(peer).map(|r| (r.endpoint.clone(), r.remote_session_id))
        }
        .ok_or_else(|| CoreError::SendFailed(format!("no known route to peer {}", hex::encode(peer))))?;

        if let Some(local_session_id) = self.session_core.get_by_peer(peer) {
            let (n, ciphertext) = self.session_core.encrypt(local_session_id, payload)?;
            let envelope = envelope::NoiseEnvelope {
                packet_type,
                version: ProtocolVersion::NOISE_IK.0,
                session_id: remote_session_id,
                payload: with_counter(n, ciphertext),
            };
            let wire = codec::serialize(codec::PACKET_TYPE_NOISE_MESSAGE, &envelope.encode());
            self.dispatch_send(&endpoint, peer, &wire).await
        } else {
            let wire = codec::serialize(packet_type, payload);
            self.dispatch_send(&endpoint, peer, &wire).await
        }
    }

    async fn dispatch_send(&self, endpoint: &Endpoint, peer: &[u8; 32], wire: &[u8]) -> Result<(), CoreError> {
        match self.transport.send_or_connect(endpoint, wire).await {
            Ok(()) => Ok(()),
            Err(direct_err) => {
                if let Some(relay) = &self.relay {
                    relay.send_to(*peer, wire).await.map_err(CoreError::from)
                } else {
                    Err(CoreError::from(direct_err))
                }
            }
        }
    }

    /// Start a handshake and cleartext negotiation toward `peer` at
    /// `endpoint`. Returns once the handshake completes and the commitment
    /// verifies, recording the negotiated version as the peer's route.
    pub async fn connect(&self, peer_static_key: [u8; 32], endpoint: Endpoint) -> Result<(), CoreError> {
        let (session_id, flight1) = self.session_core.initiate(peer_static_key)?;

        let negotiation_msg = NegotiationMessage {
            supported_versions: self.capabilities.supported_versions.clone(),
            selected_version: None,
        };
        let mut hello = codec::serialize(
            codec::PACKET_TYPE_VERSION_NEGOTIATION,
            &negotiation::encode_unsigned(&negotiation_msg),
        );
        hello = codec::extension::with_header(&hello);

        let rx = self.pending_negotiations.register(session_id);
        self.transport.send_or_connect(&endpoint, &hello).await?;

        let handshake_envelope = envelope::HandshakeEnvelope {
            handshake_type: envelope::HANDSHAKE_FLIGHT_1,
            session_id,
            handshake_data: flight1,
            payload: vec![],
        };
        let wire = codec::serialize(codec::PACKET_TYPE_NOISE_HANDSHAKE, &handshake_envelope.encode());
        self.transport.send_or_connect(&endpoint, &wire).await?;

        if let Some(rx) = rx {
            // The route itself (including the responder's session id) is
            // recorded by the flight-2 handler once it arrives; here we only
            // need to wait for that to happen before returning to the caller.
            negotiation::await_negotiation(rx, self.capabilities.negotiation_timeout).await?;
        }
        Ok(())
    }

    /// Dispatch an inbound packet from `endpoint`. This is what a
    /// [`crate::transport::PacketHandler`] should call.
    pub fn handle_inbound(self: &Arc<Self>, endpoint: Endpoint, bytes: Vec<u8>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.handle_inbound_inner(endpoint, bytes).await {
                tracing::warn!(error = %err, "failed to handle inbound packet");
            }
        });
    }

    async fn handle_inbound_inner(&self, endpoint: Endpoint, bytes: Vec<u8>) -> Result<(), CoreError> {
        let (packet_type, payload) = codec::parse(&bytes)?;
        if !codec::is_extension_type(packet_type) {
            return Err(CoreError::NoHandler(packet_type));
        }
        let payload = codec::extension::validate_and_strip(payload)?;

        match packet_type {
            codec::PACKET_TYPE_VERSION_NEGOTIATION => self.handle_negotiation(endpoint, payload).await,
            codec::PACKET_TYPE_NOISE_HANDSHAKE => self.handle_handshake(endpoint, payload).await,
            codec::PACKET_TYPE_NOISE_MESSAGE => self.handle_noise_message(payload),
            _ => Err(CoreError::NoHandler(packet_type)),
        }
    }

    /// Handle an inbound cleartext negotiation packet. A hello gets an
    /// immediate reply naming the version this side would pick; a reply to
    /// our own hello is only logged, since correlation and trust both flow
    /// through the Noise-bound commitment on the accompanying handshake
    /// flight, not through this unauthenticated exchange.
    async fn handle_negotiation(&self, endpoint: Endpoint, payload: &[u8]) -> Result<(), CoreError> {
        let msg = negotiation::decode_unsigned(payload)?;
        if let Some(selected) = msg.selected_version {
            tracing::debug!(selected, "received negotiation reply");
            return Ok(());
        }
        tracing::debug!(?msg.supported_versions, "received negotiation hello");
        let reply = NegotiationMessage {
            supported_versions: self.capabilities.supported_versions.clone(),
            selected_version: negotiation::select_version(&self.capabilities, &msg.supported_versions),
        };
        let mut wire = codec::serialize(
            codec::PACKET_TYPE_VERSION_NEGOTIATION,
            &negotiation::encode_unsigned(&reply),
        );
        wire = codec::extension::with_header(&wire);
        self.transport.send_or_connect(&endpoint, &wire).await?;
        Ok(())
    }

    /// Encrypt and send this side's own version commitment over a just-
    /// established session, as the initiator's half of the spec §4.4
    /// bidirectional exchange. Uses `encrypt_raw` rather than the gated
    /// `encrypt`, since the session is not marked verified until the peer's
    /// own commitment (sent the same way, in the other direction) arrives.
    async fn send_commitment(&self, session_id: u32, remote_session_id: u32, endpoint: &Endpoint) -> Result<(), CoreError> {
        let transcript = self.session_core.transcript_hash(session_id)?;
        let commitment = commitment::build(&transcript, ProtocolVersion::NOISE_IK.0, self.clock.unix_seconds());
        let (n, ciphertext) = self.session_core.encrypt_raw(session_id, &commitment)?;
        let envelope = envelope::NoiseEnvelope {
            packet_type: codec::PACKET_TYPE_NOISE_COMMITMENT,
            version: ProtocolVersion::NOISE_IK.0,
            session_id: remote_session_id,
            payload: with_counter(n, ciphertext),
        };
        let wire = codec::serialize(codec::PACKET_TYPE_NOISE_MESSAGE, &envelope.encode());
        let wire = codec::extension::with_header(&wire);
        self.transport.send_or_connect(endpoint, &wire).await?;
        Ok(())
    }

    async fn handle_handshake(&self, endpoint: Endpoint, payload: &[u8]) -> Result<(), CoreError> {
        let env = envelope::HandshakeEnvelope::decode(payload).map_err(CodecError::from)?;
        match env.handshake_type {
            envelope::HANDSHAKE_FLIGHT_1 => {
                let session_id = self.session_core.accept(&env.handshake_data)?;
                let transcript = self.session_core.pending_accept_transcript(session_id)?;
                let version = ProtocolVersion::NOISE_IK.0;
                let commitment = commitment::build(&transcript, version, self.clock.unix_seconds());
                let flight2 = self
                    .session_core
                    .accept_write_flight2(session_id, &commitment, ProtocolVersion::NOISE_IK)?;

                // The session is not trusted yet: it stays unverified, and
                // out of the router, until the initiator's own commitment
                // arrives and verifies (see `handle_commitment`). Stash what
                // that handler will need to finish registering the route.
                self.pending_responder_routes.lock().expect("pending responder routes mutex poisoned").insert(
                    session_id,
                    PendingResponderRoute {
                        endpoint: endpoint.clone(),
                        remote_session_id: env.session_id,
                    },
                );

                let reply = envelope::HandshakeEnvelope {
                    handshake_type: envelope::HANDSHAKE_FLIGHT_2,
                    session_id: env.session_id,
                    handshake_data: flight2,
                    payload: session_id.to_be_bytes().to_vec(),
                };
                let wire = codec::serialize(codec::PACKET_TYPE_NOISE_HANDSHAKE, &reply.encode());
                let wire = codec::extension::with_header(&wire);
                self.transport.send_or_connect(&endpoint, &wire).await?;
                Ok(())
            }
            envelope::HANDSHAKE_FLIGHT_2 => {
                let transcript = self.session_core.pending_initiation_transcript(env.session_id)?;
                let commitment = self.session_core.complete_initiator(
                    env.session_id,
                    &env.handshake_data,
                    ProtocolVersion::NOISE_IK,
                )?;
                let expected_version = ProtocolVersion::NOISE_IK.0;
                let verify_result =
                    commitment::verify(&transcript, expected_version, self.clock.unix_seconds(), &commitment);

                let remote_session_id = env.payload.as_slice().try_into().map(u32::from_be_bytes).ok();

                match (verify_result, remote_session_id) {
                    (Ok(()), Some(remote_session_id)) => {
                        // Our own half of the exchange: send our commitment
                        // back before trusting the session ourselves. Only
                        // once both halves have verified is the session live.
                        self.send_commitment(env.session_id, remote_session_id, &endpoint).await?;
                        self.session_core.mark_verified(env.session_id)?;
                        if let Some(peer) = self.peer_for_session(env.session_id) {
                            self.router.add_session(env.session_id, peer);
                            self.set_peer_route(peer, endpoint, ProtocolVersion::NOISE_IK, remote_session_id);
                        }
                        self.pending_negotiations.resolve(env.session_id, Ok(expected_version));
                    }
                    (verify_result, _) => {
                        self.session_core.remove(env.session_id);
                        let err = verify_result.err().unwrap_or(commitment::CommitmentError::Malformed);
                        self.pending_negotiations
                            .resolve(env.session_id, Err(negotiation::NegotiationError::from(err)));
                    }
                }
                Ok(())
            }
            _ => Err(CoreError::Codec(CodecError::InvalidExtension)),
        }
    }

    /// Handle the initiator's half of the spec §4.4 bidirectional
    /// commitment exchange, arriving as a post-handshake Noise message on
    /// the responder's side. Only once this verifies does the responder
    /// mark the session trusted and register it with the router.
    fn handle_commitment(&self, env: &envelope::NoiseEnvelope) -> Result<(), CoreError> {
        let (n, ciphertext) = split_counter(&env.payload).ok_or(CodecError::ShortPacket)?;
        let commitment = self.session_core.decrypt_raw(env.session_id, n, ciphertext)?;
        let transcript = self.session_core.transcript_hash(env.session_id)?;
        commitment::verify(&transcript, ProtocolVersion::NOISE_IK.0, self.clock.unix_seconds(), &commitment)
            .map_err(negotiation::NegotiationError::from)?;

        self.session_core.mark_verified(env.session_id)?;
        let pending = self
            .pending_responder_routes
            .lock()
            .expect("pending responder routes mutex poisoned")
            .remove(&env.session_id);
        if let (Some(pending), Some(peer)) = (pending, self.peer_for_session(env.session_id)) {
            self.router.add_session(env.session_id, peer);
            self.set_peer_route(peer, pending.endpoint, ProtocolVersion::NOISE_IK, pending.remote_session_id);
        }
        Ok(())
    }

    fn handle_noise_message(&self, payload: &[u8]) -> Result<(), CoreError> {
        let env = envelope::NoiseEnvelope::decode(payload).map_err(CodecError::from)?;
        if env.packet_type == codec::PACKET_TYPE_NOISE_COMMITMENT {
            return self.handle_commitment(&env);
        }
        let (n, ciphertext) = split_counter(&env.payload).ok_or(CodecError::ShortPacket)?;
        let plaintext = self.session_core.decrypt(env.session_id, n, ciphertext)?;
        self.router.route(env.session_id, env.packet_type, plaintext).map_err(|_| {
            CoreError::NoHandler(env.packet_type)
        })
    }

    fn peer_for_session(&self, session_id: u32) -> Option<[u8; 32]> {
        self.session_core.peer_for_session(session_id)
    }
}

fn with_counter(n: u64, ciphertext: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ciphertext.len());
    out.extend_from_slice(&n.to_be_bytes());
    out.extend_from_slice(&ciphertext);
    out
}

fn split_counter(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < 8 {
        return None;
    }
    let n = u64::from_be_bytes(bytes[..8].try_into().ok()?);
    Some((n, &bytes[8..]))
}
