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

//! TCP relay client (spec §4.7): reaches peers that cannot be dialed
//! directly by routing through a relay server over its own framing.
//!
//! Wire frame: `[frame_type(1)][body]`, length-delimited by the underlying
//! stream transport's own 4-byte length prefix (spec §4.5), so a frame here
//! never needs its own length field.

use crate::endpoint::{Capability, Endpoint};
use crate::transport::stream::StreamTransport;
use crate::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Informational routing frame; the relay's own address-record gossip.
/// This crate only logs it, never parses the payload further (spec §3 non-goal:
/// routing/DHT is out of scope).
const FRAME_ROUTING: u8 = 0;
const FRAME_DATA: u8 = 1;
const FRAME_PING: u8 = 2;
const FRAME_PONG: u8 = 3;
const FRAME_DISCONNECT: u8 = 4;

/// Registration, sent once per connection attempt, is its own two-part
/// wire shape rather than a `[frame_type][body]` frame: `[0x00][pubkey(32)]`
/// out, `[0x00, 0x01]` back.
const REGISTER_MARKER: u8 = 0x00;
const REGISTER_ACK: [u8; 2] = [0x00, 0x01];

/// How long `connect` waits for a relay's registration ack before trying
/// the next server.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

fn registration_body(public_key: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.push(REGISTER_MARKER);
    out.extend_from_slice(public_key);
    out
}

/// A relay server this node may route through, ordered by preference.
///
/// Unlike peer addresses, which always arrive as opaque [`Endpoint`]s (spec
/// §3 non-goal: no address-family parsing for peers), a relay server is
/// always dialed over a direct TCP connection, so its socket address is
/// configuration the caller supplies directly rather than something derived
/// from peer-supplied, possibly-non-IP data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RelayServer {
    /// The relay server's dialable socket address.
    pub address: SocketAddr,
    /// The relay's long-term public key (spec §4.7: relays are
    /// authenticated by key, not by address).
    pub public_key: [u8; 32],
    /// Lower is preferred when multiple relays are configured.
    pub priority: u8,
}

impl RelayServer {
    fn dial_endpoint(&self) -> Endpoint {
        Endpoint::stream(self.address, Capability::direct())
    }
}

/// Relay client errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The underlying stream transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The relay server rejected or never acknowledged registration.
    #[error("registration with relay failed")]
    RegistrationFailed,
    /// No relay server is currently connected.
    #[error("no relay connection available")]
    NotConnected,
    /// A relay frame was shorter than its minimum length.
    #[error("malformed relay frame")]
    Malformed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RelayConnState {
    Connecting,
    Registered,
    Disconnected,
}

/// Invoked for every data frame the relay delivers, with the source peer's
/// public key and the carried bytes.
pub type RelayDataHandler = Arc<dyn Fn([u8; 32], Vec<u8>) + Send + Sync>;

struct ConnEntry {
    state: RelayConnState,
    server: RelayServer,
}

/// A client connection to one or more relay servers (spec §4.7).
pub struct RelayClient {
    stream_transport: Arc<StreamTransport>,
    local_public_key: [u8; 32],
    servers: Vec<RelayServer>,
    conns: Mutex<HashMap<SocketAddr, ConnEntry>>,
    pending_acks: Mutex<HashMap<SocketAddr, oneshot::Sender<()>>>,
    handler: Mutex<Option<RelayDataHandler>>,
    closed: Arc<AtomicBool>,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
}

fn frame(frame_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(frame_type);
    out.extend_from_slice(body);
    out
}

impl RelayClient {
    /// Build a relay client driven by an already-bound stream transport,
    /// ordering `servers` by ascending priority.
    pub fn new(
        stream_transport: Arc<StreamTransport>,
        local_public_key: [u8; 32],
        mut servers: Vec<RelayServer>,
    ) -> Arc<Self> {
        servers.sort_by_key(|s| s.priority);
        let client = Arc::new(Self {
            stream_transport,
            local_public_key,
            servers,
            conns: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
            handler: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            keepalive_task: Mutex::new(None),
        });
        let for_handler = client.clone();
        client.stream_transport.register_handler(Arc::new(move |endpoint, bytes| {
            let Some(from) = endpoint.socket_addr() else { return };
            if let Err(err) = for_handler.handle_incoming_frame(from, &bytes) {
                tracing::warn!(error = %err, "dropping malformed relay frame");
            }
        }));
        client.start_keepalive();
        client
    }

    fn start_keepalive(self: &Arc<Self>) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(20));
            loop {
                ticker.tick().await;
                if this.closed.load(Ordering::SeqCst) {
                    return;
                }
                this.ping_all().await;
            }
        });
        *self.keepalive_task.lock().expect("keepalive task mutex poisoned") = Some(task);
    }

    async fn ping_all(&self) {
        let addresses: Vec<SocketAddr> = {
            let conns = self.conns.lock().expect("relay conns mutex poisoned");
            conns
                .iter()
                .filter(|(_, e)| e.state == RelayConnState::Registered)
                .map(|(addr, _)| *addr)
                .collect()
        };
        for address in addresses {
            if let Some(server) = self.servers.iter().find(|s| s.address == address) {
                let _ = self
                    .stream_transport
                    .send_or_connect(&server.dial_endpoint(), &frame(FRAME_PING, &[]))
                    .await;
            }
        }
    }

    /// Register with every configured relay server in priority order.
    /// Succeeds as soon as one actually acknowledges registration (spec
    /// §4.5/§6: send `[0x00][pubkey(32)]`, wait for the 2-byte
    /// `[0x00, 0x01]` ack); a server that accepts the TCP connection but
    /// never acks is skipped, not trusted.
    pub async fn connect(&self) -> Result<(), RelayError> {
        for server in &self.servers {
            {
                let mut conns = self.conns.lock().expect("relay conns mutex poisoned");
                conns.insert(
                    server.address,
                    ConnEntry {
                        state: RelayConnState::Connecting,
                        server: *server,
                    },
                );
            }

            let (tx, rx) = oneshot::channel();
            self.pending_acks
                .lock()
                .expect("relay pending acks mutex poisoned")
                .insert(server.address, tx);

            let sent = self
                .stream_transport
                .send_or_connect(&server.dial_endpoint(), &registration_body(&self.local_public_key))
                .await
                .is_ok();

            let acked = sent
                && matches!(
                    tokio::time::timeout(REGISTRATION_TIMEOUT, rx).await,
                    Ok(Ok(()))
                );
            self.pending_acks.lock().expect("relay pending acks mutex poisoned").remove(&server.address);

            if acked {
                let mut conns = self.conns.lock().expect("relay conns mutex poisoned");
                if let Some(entry) = conns.get_mut(&server.address) {
                    entry.state = RelayConnState::Registered;
                }
                return Ok(());
            }
        }
        Err(RelayError::RegistrationFailed)
    }

    /// Register the handler invoked for every relayed data frame.
    pub fn register_handler(&self, handler: RelayDataHandler) {
        *self.handler.lock().expect("relay handler mutex poisoned") = Some(handler);
    }

    /// Send `bytes` to `target_public_key` through the first registered
    /// relay connection.
    pub async fn send_to(&self, target_public_key: [u8; 32], bytes: &[u8]) -> Result<(), RelayError> {
        let address = {
            let conns = self.conns.lock().expect("relay conns mutex poisoned");
            conns
                .iter()
                .find(|(_, e)| e.state == RelayConnState::Registered)
                .map(|(addr, _)| *addr)
        };
        let address = address.ok_or(RelayError::NotConnected)?;
        let server = self
            .servers
            .iter()
            .find(|s| s.address == address)
            .ok_or(RelayError::NotConnected)?;

        let mut body = Vec::with_capacity(32 + 4 + bytes.len());
        body.extend_from_slice(&target_public_key);
        body.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        body.extend_from_slice(bytes);
        self.stream_transport
            .send_or_connect(&server.dial_endpoint(), &frame(FRAME_DATA, &body))
            .await?;
        Ok(())
    }

    /// Dispatch a raw frame received from `from`, the relay server's
    /// address, over the relay's stream transport.
    pub fn handle_incoming_frame(&self, from: SocketAddr, bytes: &[u8]) -> Result<(), RelayError> {
        if bytes == REGISTER_ACK {
            if let Some(tx) = self.pending_acks.lock().expect("relay pending acks mutex poisoned").remove(&from) {
                let _ = tx.send(());
            }
            return Ok(());
        }

        let (&frame_type, body) = bytes.split_first().ok_or(RelayError::Malformed)?;
        match frame_type {
            FRAME_DATA => {
                if body.len() < 32 + 4 {
                    return Err(RelayError::Malformed);
                }
                let mut source = [0u8; 32];
                source.copy_from_slice(&body[..32]);
                let len = u32::from_be_bytes(body[32..36].try_into().unwrap()) as usize;
                let payload = body.get(36..36 + len).ok_or(RelayError::Malformed)?.to_vec();
                let handler = self.handler.lock().expect("relay handler mutex poisoned").clone();
                if let Some(handler) = handler {
                    handler(source, payload);
                }
                Ok(())
            }
            FRAME_PING | FRAME_PONG => Ok(()),
            FRAME_ROUTING => {
                tracing::debug!("ignoring relay routing gossip frame");
                Ok(())
            }
            FRAME_DISCONNECT => {
                tracing::debug!("relay server sent disconnect");
                Ok(())
            }
            _ => Err(RelayError::Malformed),
        }
    }

    /// Close every relay connection. Idempotent.
    pub async fn close(&self) -> Result<(), RelayError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self
            .keepalive_task
            .lock()
            .expect("keepalive task mutex poisoned")
            .take()
        {
            task.abort();
        }
        self.conns.lock().expect("relay conns mutex poisoned").clear();
        Ok(())
    }
}
