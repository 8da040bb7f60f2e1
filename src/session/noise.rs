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

//! Thin wrapper around `snow`'s Noise-IK handshake (spec §4.2).
//!
//! The core uses `StatelessTransportState` rather than `snow`'s own
//! auto-incrementing transport, so it can drive the nonce explicitly and
//! layer its own [`super::replay::ReplayWindow`] on top.

use snow::params::NoiseParams;
use snow::{Builder, HandshakeState, StatelessTransportState};
use thiserror::Error;

const PARAMS_STR: &str = "Noise_IK_25519_ChaChaPoly_SHA256";
/// Maximum plaintext/ciphertext size `snow` will produce in one call.
pub const MAX_MESSAGE_LEN: usize = 65535;

/// Noise handshake errors.
#[derive(Debug, Error)]
pub enum NoiseError {
    /// `snow` rejected a parameter string, key, or handshake message.
    #[error("noise protocol error: {0}")]
    Snow(#[from] snow::Error),
    /// A method was called before the handshake reached the expected state.
    #[error("handshake not yet complete")]
    NotComplete,
}

fn params() -> NoiseParams {
    PARAMS_STR.parse().expect("static Noise-IK params string is valid")
}

/// Build the initiator side of a Noise-IK handshake. The initiator must
/// already know the responder's static public key.
pub fn build_initiator(
    local_private: &[u8; 32],
    remote_public: &[u8; 32],
) -> Result<HandshakeState, NoiseError> {
    let state = Builder::new(params())
        .local_private_key(local_private)
        .remote_public_key(remote_public)
        .build_initiator()?;
    Ok(state)
}

/// Build the responder side of a Noise-IK handshake. The responder learns
/// the initiator's static public key from the first handshake message.
pub fn build_responder(local_private: &[u8; 32]) -> Result<HandshakeState, NoiseError> {
    let state = Builder::new(params())
        .local_private_key(local_private)
        .build_responder()?;
    Ok(state)
}

/// Write the next handshake flight, optionally piggybacking `payload`
/// (used to carry the encrypted version commitment on flight 2).
pub fn write_flight(
    state: &mut HandshakeState,
    payload: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    let len = state.write_message(payload, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Read the next handshake flight, returning any piggybacked payload.
pub fn read_flight(state: &mut HandshakeState, message: &[u8]) -> Result<Vec<u8>, NoiseError> {
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    let len = state.read_message(message, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Handshake transcript hash (spec §4.4), used as the HMAC key for the
/// version commitment. Must be read before `into_transport`.
pub fn transcript_hash(state: &HandshakeState) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(state.get_handshake_hash());
    out
}

/// The peer's static public key, learned from the handshake. Available to
/// the initiator immediately and to the responder once the first message
/// has been read.
pub fn remote_static(state: &HandshakeState) -> Option<[u8; 32]> {
    let bytes = state.get_remote_static()?;
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Some(out)
}

/// Finish the handshake and switch to explicit-nonce transport mode.
pub fn into_transport(state: HandshakeState) -> Result<StatelessTransportState, NoiseError> {
    if !state.is_handshake_finished() {
        return Err(NoiseError::NotComplete);
    }
    Ok(state.into_stateless_transport_mode()?)
}

/// Encrypt `plaintext` under transport keys with explicit nonce `n`.
pub fn encrypt(
    transport: &StatelessTransportState,
    n: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let mut buf = vec![0u8; plaintext.len() + 16];
    let len = transport.write_message(n, plaintext, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Decrypt `ciphertext` under transport keys with explicit nonce `n`.
pub fn decrypt(
    transport: &StatelessTransportState,
    n: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let mut buf = vec![0u8; ciphertext.len()];
    let len = transport.read_message(n, ciphertext, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}
