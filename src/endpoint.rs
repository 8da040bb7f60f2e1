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

//! Opaque endpoint handles (spec §3, design note "Opaque endpoints replace
//! concrete address types").
//!
//! An `Endpoint` never exposes the concrete address family it was built
//! from. Code that used to switch on a concrete address enum instead tests
//! `Capability` fields (`endpoint.capability().requires_proxy`,
//! `endpoint.kind() == EndpointKind::Datagram`).

use std::net::SocketAddr;

/// The coarse underlay classifier that determines which transport carries
/// a send to this endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// One-shot datagram underlay (UDP-like).
    Datagram,
    /// Framed, connection-oriented stream underlay (TCP-like).
    Stream,
    /// Reached only via a relay server; no direct underlay applies.
    Relayed,
}

/// Coarse routing classification, used by capability scoring (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoutingKind {
    /// Directly reachable, no translation in the path.
    Direct,
    /// Reachable only after NAT traversal.
    Nat,
    /// Reachable only through a proxy (onion/garlic/SOCKS/SAM).
    Proxy,
    /// A mix of the above (e.g. multihomed peer).
    Mixed,
}

/// Small capability descriptor carried by every endpoint, replacing
/// inspection of the concrete address type (spec §3, §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capability {
    /// The endpoint lives in a private/local address space.
    pub is_private_space: bool,
    /// The endpoint can be reached without a proxy or relay.
    pub supports_direct: bool,
    /// The endpoint can only be reached through a proxy.
    pub requires_proxy: bool,
    /// Coarse routing classification.
    pub routing: RoutingKind,
}

impl Capability {
    /// A fully open, directly reachable, non-NATed endpoint.
    pub fn direct() -> Self {
        Self {
            is_private_space: false,
            supports_direct: true,
            requires_proxy: false,
            routing: RoutingKind::Direct,
        }
    }

    /// A NAT-bound endpoint that still accepts hole punching.
    pub fn nat() -> Self {
        Self {
            is_private_space: false,
            supports_direct: false,
            requires_proxy: false,
            routing: RoutingKind::Nat,
        }
    }

    /// An endpoint reachable only through a proxy (onion/garlic/SOCKS/SAM).
    pub fn proxied() -> Self {
        Self {
            is_private_space: false,
            supports_direct: false,
            requires_proxy: true,
            routing: RoutingKind::Proxy,
        }
    }

    /// `supports_nat` as referenced by the hole-punch capability score
    /// (spec §4.6): derived from `routing`, not a stored field.
    pub fn supports_nat(&self) -> bool {
        self.routing == RoutingKind::Nat
    }

    /// Capability score used to pick the best local endpoint when guessing
    /// a public address (spec §4.6):
    /// `100·supports_direct + 50·¬is_private + 30·¬requires_proxy + 10·supports_nat`.
    pub fn score(&self) -> u32 {
        let mut score = 0u32;
        if self.supports_direct {
            score += 100;
        }
        if !self.is_private_space {
            score += 50;
        }
        if !self.requires_proxy {
            score += 30;
        }
        if self.supports_nat() {
            score += 10;
        }
        score
    }
}

/// An opaque peer endpoint handle. Cheap to clone; endpoints never own a
/// socket or connection.
#[derive(Clone, Debug)]
pub struct Endpoint {
    kind: EndpointKind,
    capability: Capability,
    key: String,
    canonical: Option<[u8; 16]>,
    socket_addr: Option<SocketAddr>,
}

impl Endpoint {
    /// A datagram (UDP-like) endpoint at a concrete socket address.
    pub fn datagram(addr: SocketAddr, capability: Capability) -> Self {
        Self {
            kind: EndpointKind::Datagram,
            capability,
            key: format!("udp://{addr}"),
            canonical: canonical_from_addr(addr),
            socket_addr: Some(addr),
        }
    }

    /// A stream (TCP-like) endpoint at a concrete socket address.
    pub fn stream(addr: SocketAddr, capability: Capability) -> Self {
        Self {
            kind: EndpointKind::Stream,
            capability,
            key: format!("tcp://{addr}"),
            canonical: canonical_from_addr(addr),
            socket_addr: Some(addr),
        }
    }

    /// A stream endpoint reachable only by name through an external dial
    /// capability (onion/garlic/SAM address families); the core never
    /// parses `opaque_name`, it only uses it as a map key and hands it back
    /// to the injected dialer.
    pub fn proxied_stream(opaque_name: impl Into<String>, capability: Capability) -> Self {
        Self {
            kind: EndpointKind::Stream,
            capability,
            key: opaque_name.into(),
            canonical: None,
            socket_addr: None,
        }
    }

    /// A synthetic endpoint for a peer reached through a relay server
    /// (spec §9, "Relay address as a first-class endpoint variant").
    pub fn relay(server: &str, source_key: &[u8; 32]) -> Self {
        Self {
            kind: EndpointKind::Relayed,
            capability: Capability::proxied(),
            key: format!("relay://{server}/{}", hex::encode(source_key)),
            canonical: None,
            socket_addr: None,
        }
    }

    /// Coarse underlay classifier.
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Capability descriptor.
    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Stable string form, used for keying maps.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// 16-byte canonical form for IP endpoints, used only when serializing
    /// legacy node entries (spec §4.1). `None` for non-IP endpoints.
    pub fn canonical_bytes(&self) -> Option<&[u8; 16]> {
        self.canonical.as_ref()
    }

    /// Concrete socket address, when this endpoint was constructed from one.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.socket_addr
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

fn canonical_from_addr(addr: SocketAddr) -> Option<[u8; 16]> {
    match addr.ip() {
        std::net::IpAddr::V4(v4) => {
            let mut out = [0u8; 16];
            out[10] = 0xff;
            out[11] = 0xff;
            out[12..16].copy_from_slice(&v4.octets());
            Some(out)
        }
        std::net::IpAddr::V6(v6) => Some(v6.octets()),
    }
}
