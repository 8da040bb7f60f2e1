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

//! Underlay transport abstraction (spec §3, §4.5): datagram, framed
//! stream, and a multiplexer that dispatches by endpoint kind.

pub mod datagram;
pub mod multi;
pub mod stream;

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Transport-layer errors (spec §7).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying socket or stream operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The destination endpoint cannot be reached by this transport.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The transport has already been closed.
    #[error("transport closed")]
    Closed,
    /// A write did not complete within the transport's deadline.
    #[error("write deadline exceeded")]
    Timeout,
}

/// Invoked for every packet a transport receives, with the endpoint it
/// arrived from and the raw bytes (still codec-wrapped).
pub type PacketHandler = Arc<dyn Fn(Endpoint, Vec<u8>) + Send + Sync>;

/// An underlay capable of sending bytes to an [`Endpoint`] and delivering
/// received bytes to a registered [`PacketHandler`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `bytes` to `endpoint`.
    async fn send(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError>;

    /// Send `bytes` to `endpoint`, opening a connection first if this
    /// transport is connection-oriented and none exists yet (spec §4.2: "a
    /// connection is lazily opened on first send"). Transports without a
    /// connection-setup step (datagram) can leave this at the default,
    /// which is just `send`; [`stream::StreamTransport`] overrides it.
    async fn send_or_connect(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        self.send(endpoint, bytes).await
    }

    /// This transport's own local endpoint, if it is bound to one.
    fn local_endpoint(&self) -> Option<Endpoint>;

    /// Register the handler invoked for every inbound packet. Replaces any
    /// previously registered handler.
    fn register_handler(&self, handler: PacketHandler);

    /// Close the transport. Idempotent: closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Future returned by a [`Dialer`].
pub type DialFuture =
    Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send>>;

/// Capability for establishing outbound connections to endpoints that a
/// transport cannot reach by socket address alone (onion/garlic/SAM
/// addresses reached only by opaque name through an external proxy).
pub trait Dialer: Send + Sync {
    /// Attempt to open a connection to `endpoint`, identified only by its
    /// opaque string key.
    fn dial(&self, endpoint: Endpoint) -> DialFuture;
}

/// Validate a peer-supplied endpoint before admitting it as a send target
/// (spec §4.6: reject endpoints claiming capabilities the local policy
/// refuses, e.g. a proxy-only local policy receiving a direct-only peer).
pub fn validate_add_peer(endpoint: &Endpoint, allow_private_space: bool) -> Result<(), TransportError> {
    if endpoint.capability().is_private_space && !allow_private_space {
        return Err(TransportError::Unreachable(format!(
            "{endpoint} is in a private address space and local policy forbids it"
        )));
    }
    Ok(())
}
