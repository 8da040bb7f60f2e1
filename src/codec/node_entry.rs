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

//! DHT-style node-entry codecs (spec §3, §6).
//!
//! Two wire formats interoperate: *legacy* (fixed-size, IPv4/IPv6 only) and
//! *extended* (variable-length, any address family). The core never
//! classifies the address bytes it carries — `address_type`/`address` are
//! opaque to everything except the two codecs below and whatever external
//! component constructed them.

use super::CodecError;

/// Prefix of an IPv4-mapped IPv6 address (`::ffff:0:0/96`).
const V4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

const LEGACY_LEN: usize = 32 + 16 + 2;
const EXTENDED_MIN_LEN: usize = 32 + 1 + 1 + 2;

/// A single DHT-style node entry: a peer's public key plus an address and
/// port. `last_seen` is local bookkeeping the wire formats never carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    /// The node's long-term public key.
    pub public_key: [u8; 32],
    /// Opaque address-family tag (extended codec only; legacy entries are
    /// always IPv4-mapped IPv6).
    pub address_type: u8,
    /// Opaque address bytes: 16 bytes of IPv4-mapped/native IPv6 for
    /// legacy entries, `address_len` bytes of anything for extended ones.
    pub address: Vec<u8>,
    /// Port in host byte order.
    pub port: u16,
}

/// True if `addr` is a 16-byte IPv4-mapped IPv6 address.
pub fn is_ipv4_mapped(addr: &[u8]) -> bool {
    addr.len() == 16 && addr[..12] == V4_MAPPED_PREFIX
}

/// Selection rule (spec §3): legacy iff the address is a 16-byte IPv4/IPv6
/// form *and* the peer is known to speak the legacy codec.
pub fn should_use_legacy(address_len: usize, peer_is_known_legacy: bool) -> bool {
    address_len == 16 && peer_is_known_legacy
}

/// Encode a legacy node entry: `[pubkey(32)][ipv4_mapped_ipv6(16)][port(2, be)]`.
pub fn encode_legacy(entry: &NodeEntry) -> Result<[u8; LEGACY_LEN], CodecError> {
    if entry.address.len() != 16 {
        return Err(CodecError::UnsupportedAddressKind);
    }
    let mut out = [0u8; LEGACY_LEN];
    out[..32].copy_from_slice(&entry.public_key);
    out[32..48].copy_from_slice(&entry.address);
    out[48..50].copy_from_slice(&entry.port.to_be_bytes());
    Ok(out)
}

/// Decode a legacy node entry. `address_type` is inferred: 4 if the address
/// carries the IPv4-mapped prefix, 6 otherwise.
pub fn decode_legacy(bytes: &[u8]) -> Result<NodeEntry, CodecError> {
    if bytes.len() != LEGACY_LEN {
        return Err(CodecError::ShortPacket);
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&bytes[..32]);
    let address = bytes[32..48].to_vec();
    let port = u16::from_be_bytes([bytes[48], bytes[49]]);
    let address_type = if is_ipv4_mapped(&address) { 4 } else { 6 };
    Ok(NodeEntry {
        public_key,
        address_type,
        address,
        port,
    })
}

/// Encode an extended node entry:
/// `[pubkey(32)][addr_type(1)][addr_len(1)][addr(addr_len)][port(2, be)]`.
pub fn encode_extended(entry: &NodeEntry) -> Result<Vec<u8>, CodecError> {
    if entry.address.len() > u8::MAX as usize {
        return Err(CodecError::UnsupportedAddressKind);
    }
    let mut out = Vec::with_capacity(32 + 1 + 1 + entry.address.len() + 2);
    out.extend_from_slice(&entry.public_key);
    out.push(entry.address_type);
    out.push(entry.address.len() as u8);
    out.extend_from_slice(&entry.address);
    out.extend_from_slice(&entry.port.to_be_bytes());
    Ok(out)
}

/// Decode an extended node entry.
pub fn decode_extended(bytes: &[u8]) -> Result<NodeEntry, CodecError> {
    if bytes.len() < EXTENDED_MIN_LEN {
        return Err(CodecError::ShortPacket);
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&bytes[..32]);
    let address_type = bytes[32];
    let addr_len = bytes[33] as usize;
    let expected_len = 32 + 1 + 1 + addr_len + 2;
    if bytes.len() != expected_len {
        return Err(CodecError::ShortPacket);
    }
    let address = bytes[34..34 + addr_len].to_vec();
    let port_off = 34 + addr_len;
    let port = u16::from_be_bytes([bytes[port_off], bytes[port_off + 1]]);
    Ok(NodeEntry {
        public_key,
        address_type,
        address,
        port,
    })
}
