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

//! Wire envelopes carried inside the Noise handshake and Noise message
//! packet types (spec §4.2, §6).

use super::CodecError;

/// First handshake flight (initiator -> responder).
pub const HANDSHAKE_FLIGHT_1: u8 = 1;
/// Second handshake flight (responder -> initiator).
pub const HANDSHAKE_FLIGHT_2: u8 = 2;

const ENVELOPE_HEADER_LEN: usize = 1 + 1 + 4 + 4;
const HANDSHAKE_HEADER_LEN: usize = 1 + 4 + 4;

/// A post-handshake Noise message envelope:
/// `[type(1)][version(1)][session_id(4, be)][payload_len(4, be)][payload]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoiseEnvelope {
    /// Outer packet type this envelope was carried under.
    pub packet_type: u8,
    /// Negotiated protocol version in effect for this session.
    pub version: u8,
    /// Session identifier assigned at handshake completion.
    pub session_id: u32,
    /// Ciphertext payload (nonce and tag live inside it, per the session layer).
    pub payload: Vec<u8>,
}

impl NoiseEnvelope {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + self.payload.len());
        out.push(self.packet_type);
        out.push(self.version);
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < ENVELOPE_HEADER_LEN {
            return Err(CodecError::ShortPacket);
        }
        let packet_type = bytes[0];
        let version = bytes[1];
        let session_id = u32::from_be_bytes(bytes[2..6].try_into().unwrap());
        let payload_len = u32::from_be_bytes(bytes[6..10].try_into().unwrap()) as usize;
        let body = &bytes[10..];
        if body.len() != payload_len {
            return Err(CodecError::ShortPacket);
        }
        Ok(Self {
            packet_type,
            version,
            session_id,
            payload: body.to_vec(),
        })
    }
}

/// A handshake-flight envelope:
/// `[handshake_type(1)][session_id(4, be)][hs_len(4, be)][hs_data][payload_len(4, be)][payload]`.
///
/// `session_id` is always the initiator's own local session id, echoed back
/// unchanged by the responder. `payload` is empty on the first flight; on
/// the second flight it carries the responder's own local session id (4
/// bytes, big-endian) so the initiator learns which id to address future
/// Noise messages with. It rides outside the Noise-encrypted
/// `handshake_data` since it is routing information, not a secret — unlike
/// the version commitment, which is piggybacked inside the Noise message
/// itself (spec §4.4) and never appears in this field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeEnvelope {
    /// `HANDSHAKE_FLIGHT_1` or `HANDSHAKE_FLIGHT_2`.
    pub handshake_type: u8,
    /// Session identifier the responder assigns and the initiator echoes.
    pub session_id: u32,
    /// Raw Noise handshake message bytes for this flight.
    pub handshake_data: Vec<u8>,
    /// Piggybacked encrypted payload, empty on flight 1.
    pub payload: Vec<u8>,
}

impl HandshakeEnvelope {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HANDSHAKE_HEADER_LEN + self.handshake_data.len() + 4 + self.payload.len(),
        );
        out.push(self.handshake_type);
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&(self.handshake_data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.handshake_data);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HANDSHAKE_HEADER_LEN {
            return Err(CodecError::ShortPacket);
        }
        let handshake_type = bytes[0];
        let session_id = u32::from_be_bytes(bytes[1..5].try_into().unwrap());
        let hs_len = u32::from_be_bytes(bytes[5..9].try_into().unwrap()) as usize;
        let rest = &bytes[9..];
        if rest.len() < hs_len + 4 {
            return Err(CodecError::ShortPacket);
        }
        let handshake_data = rest[..hs_len].to_vec();
        let payload_len_off = hs_len;
        let payload_len = u32::from_be_bytes(
            rest[payload_len_off..payload_len_off + 4].try_into().unwrap(),
        ) as usize;
        let payload = &rest[payload_len_off + 4..];
        if payload.len() != payload_len {
            return Err(CodecError::ShortPacket);
        }
        Ok(Self {
            handshake_type,
            session_id,
            handshake_data,
            payload: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_envelope_round_trips() {
        let env = NoiseEnvelope {
            packet_type: super::super::PACKET_TYPE_NOISE_MESSAGE,
            version: 2,
            session_id: 0xdead_beef,
            payload: vec![1, 2, 3, 4, 5],
        };
        let wire = env.encode();
        assert_eq!(NoiseEnvelope::decode(&wire).unwrap(), env);
    }

    #[test]
    fn noise_envelope_round_trips_empty_payload() {
        let env = NoiseEnvelope {
            packet_type: 1,
            version: 1,
            session_id: 0,
            payload: vec![],
        };
        let wire = env.encode();
        assert_eq!(NoiseEnvelope::decode(&wire).unwrap(), env);
    }

    #[test]
    fn noise_envelope_rejects_truncated_payload() {
        let mut wire = NoiseEnvelope {
            packet_type: 1,
            version: 1,
            session_id: 7,
            payload: vec![9, 9, 9],
        }
        .encode();
        wire.pop();
        assert_eq!(
            NoiseEnvelope::decode(&wire).unwrap_err(),
            CodecError::ShortPacket
        );
    }

    #[test]
    fn handshake_envelope_round_trips_first_flight() {
        let env = HandshakeEnvelope {
            handshake_type: HANDSHAKE_FLIGHT_1,
            session_id: 42,
            handshake_data: vec![0xaa; 48],
            payload: vec![],
        };
        let wire = env.encode();
        assert_eq!(HandshakeEnvelope::decode(&wire).unwrap(), env);
    }

    #[test]
    fn handshake_envelope_round_trips_second_flight_with_commitment() {
        let env = HandshakeEnvelope {
            handshake_type: HANDSHAKE_FLIGHT_2,
            session_id: 42,
            handshake_data: vec![0xbb; 64],
            payload: vec![0xcc; 41],
        };
        let wire = env.encode();
        assert_eq!(HandshakeEnvelope::decode(&wire).unwrap(), env);
    }

    #[test]
    fn handshake_envelope_rejects_short_input() {
        assert_eq!(
            HandshakeEnvelope::decode(&[1, 0, 0]).unwrap_err(),
            CodecError::ShortPacket
        );
    }
}
