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

//! Wire-format framing for typed packets, node entries, and the Noise /
//! handshake envelopes (spec §4.1, §6).

pub mod envelope;
pub mod extension;
pub mod node_entry;

use thiserror::Error;

/// First packet type reserved for the core's own extension protocols.
pub const EXTENSION_RANGE_START: u8 = 249;
/// Last packet type reserved for the core's own extension protocols.
pub const EXTENSION_RANGE_END: u8 = 254;
/// Forbidden packet type; never sent or accepted.
pub const FORBIDDEN_TYPE: u8 = 255;

/// Version negotiation packet type.
pub const PACKET_TYPE_VERSION_NEGOTIATION: u8 = 249;
/// Noise handshake packet type.
pub const PACKET_TYPE_NOISE_HANDSHAKE: u8 = 250;
/// Noise message (post-handshake encrypted application data) packet type.
pub const PACKET_TYPE_NOISE_MESSAGE: u8 = 251;
/// Post-handshake, Noise-encrypted version-commitment bootstrap message
/// (spec §4.4): the initiator's half of the bidirectional commitment
/// exchange, sent once it has verified the responder's own commitment
/// piggybacked on flight 2.
pub const PACKET_TYPE_NOISE_COMMITMENT: u8 = 252;

/// Packet codec errors (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// `parse` was given fewer than the minimum bytes for the format.
    #[error("packet shorter than the minimum header length")]
    ShortPacket,
    /// An extension-range packet's two-byte header failed validation.
    #[error("extension packet failed header validation")]
    InvalidExtension,
    /// A node-entry address did not fit the codec being used.
    #[error("unsupported node-entry address kind")]
    UnsupportedAddressKind,
}

/// Serialize a standard packet as `[type(1)][payload]`.
pub fn serialize(packet_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(packet_type);
    out.extend_from_slice(payload);
    out
}

/// Parse `[type(1)][payload]`. Fails on empty input; any non-empty input
/// parses, even a single type byte with an empty payload.
pub fn parse(bytes: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    match bytes.split_first() {
        Some((&packet_type, payload)) => Ok((packet_type, payload)),
        None => Err(CodecError::ShortPacket),
    }
}

/// True if `packet_type` falls in the extension range reserved for version
/// negotiation / Noise handshake / Noise message.
pub fn is_extension_type(packet_type: u8) -> bool {
    (EXTENSION_RANGE_START..=EXTENSION_RANGE_END).contains(&packet_type)
}
