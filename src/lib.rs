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
#![warn(missing_docs)]

//! A secure transport core for a peer-to-peer messaging protocol.
//!
//! This crate owns exactly the layer between "bytes arrived from some
//! endpoint" and "an authenticated, replay-protected, version-negotiated
//! application payload arrived from a known peer":
//! - Packet framing and node-entry codecs
//! - The Noise-IK session handshake and replay-protected transport
//! - Downgrade-protected version negotiation
//! - Datagram/stream/multiplexed underlay transports
//! - A TCP relay client and UDP hole puncher
//! - The negotiating transport facade and packet-session router that tie
//!   all of the above together
//!
//! Routing/DHT, friend/presence state, message storage, and anything above
//! the single application packet-type byte live in layers built on top of
//! this crate, not inside it.

/// Injectable time source used for every freshness check and timer.
pub mod clock;
/// Wire-format framing for packets, node entries, and handshake envelopes.
pub mod codec;
/// TOML-backed configuration for every component in this crate.
pub mod config;
/// Opaque endpoint handles replacing concrete address types.
pub mod endpoint;
/// Crate-level error aggregation.
pub mod error;
/// The negotiating transport facade tying transport, session, and
/// negotiation together behind one send/receive surface.
pub mod facade;
/// Local dual-keypair identity (Noise static + Ed25519 signing).
pub mod identity;
/// Cleartext version negotiation preceding the Noise handshake.
pub mod negotiation;
/// UDP hole punching.
pub mod punch;
/// TCP relay client.
pub mod relay;
/// Maps inbound packets to sessions and packet-type handlers.
pub mod router;
/// Session lifecycle: handshake driving, replay protection, idle sweeping.
pub mod session;
/// Underlay transport abstraction: datagram, stream, and multiplexed.
pub mod transport;

mod serde_util;

pub use error::{CoreError, Result};
