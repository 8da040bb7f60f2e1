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

//! Cleartext version negotiation preceding the Noise handshake (spec §4.4).
//!
//! Negotiation itself is not authenticated; trust comes from the
//! [`commitment`] each side encrypts into the handshake once the version is
//! chosen. A peer that tampers with the cleartext negotiation phase only
//! succeeds in making the commitment check fail.

pub mod commitment;

use crate::identity::verify_signature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Negotiation errors (spec §7).
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// A negotiation message's wire encoding was truncated or inconsistent.
    #[error("malformed negotiation message")]
    Malformed,
    /// A signed negotiation message's Ed25519 signature did not verify.
    #[error("negotiation signature invalid")]
    SignatureInvalid,
    /// No version in common and no legacy fallback permitted.
    #[error("no overlapping version and fallback disabled")]
    NoOverlapNoFallback,
    /// No response arrived before the negotiation timeout elapsed.
    #[error("negotiation timed out after {0:?}")]
    NegotiationTimeout(Duration),
    /// The post-handshake version commitment failed verification.
    #[error("commitment check failed: {0}")]
    Commitment(#[from] commitment::CommitmentError),
}

/// Local capability set advertised during negotiation (spec §3, §4.4, §9).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolCapabilities {
    /// Protocol versions this node can speak, in no particular order;
    /// [`select_version`] always picks the numerically highest overlap.
    pub supported_versions: Vec<u8>,
    /// The version advertised first in the cleartext negotiation packet.
    pub preferred: u8,
    /// Require a signed negotiation message from the peer.
    pub require_signed: bool,
    /// Permit falling back to [`crate::session::ProtocolVersion::LEGACY`]
    /// when the peer advertises no overlap above it.
    pub enable_legacy_fallback: bool,
    /// How long to wait for a negotiation reply before giving up.
    #[serde(with = "crate::serde_util::duration_millis")]
    pub negotiation_timeout: Duration,
}

impl Default for ProtocolCapabilities {
    fn default() -> Self {
        Self {
            supported_versions: vec![
                crate::session::ProtocolVersion::LEGACY.0,
                crate::session::ProtocolVersion::NOISE_IK.0,
            ],
            preferred: crate::session::ProtocolVersion::NOISE_IK.0,
            require_signed: true,
            enable_legacy_fallback: true,
            negotiation_timeout: Duration::from_secs(5),
        }
    }
}

/// A cleartext negotiation message: the sender's supported versions, and
/// (on a reply) the version it selected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationMessage {
    /// Versions the sender supports, highest preferred first.
    pub supported_versions: Vec<u8>,
    /// Set on a reply: the version the responder selected.
    pub selected_version: Option<u8>,
}

/// The numerically highest version present in both `local` and `remote`
/// (spec §8 invariant 3: `select(A, B) = max(A ∩ B)`). Falls back to
/// [`crate::session::ProtocolVersion::LEGACY`] when nothing above it
/// overlaps and `local.enable_legacy_fallback` permits it. `None` means no
/// usable version could be agreed.
pub fn select_version(local: &ProtocolCapabilities, remote: &[u8]) -> Option<u8> {
    let legacy = crate::session::ProtocolVersion::LEGACY.0;
    let highest = local
        .supported_versions
        .iter()
        .filter(|v| remote.contains(v))
        .copied()
        .max();
    match highest {
        Some(v) if v > legacy => Some(v),
        _ if local.enable_legacy_fallback && remote.contains(&legacy) => Some(legacy),
        _ => None,
    }
}

/// Bytes an Ed25519 signature is computed over for a signed negotiation
/// message: identical to the unsigned wire encoding.
pub fn signing_bytes(msg: &NegotiationMessage) -> Vec<u8> {
    encode_unsigned(msg)
}

/// Encode `[count(1)][versions...][has_selected(1)][selected?(1)]`.
pub fn encode_unsigned(msg: &NegotiationMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + msg.supported_versions.len() + 1);
    out.push(msg.supported_versions.len() as u8);
    out.extend_from_slice(&msg.supported_versions);
    match msg.selected_version {
        Some(v) => {
            out.push(1);
            out.push(v);
        }
        None => out.push(0),
    }
    out
}

/// Decode a message encoded by [`encode_unsigned`].
pub fn decode_unsigned(bytes: &[u8]) -> Result<NegotiationMessage, NegotiationError> {
    let (&count, rest) = bytes.split_first().ok_or(NegotiationError::Malformed)?;
    let count = count as usize;
    if rest.len() < count + 1 {
        return Err(NegotiationError::Malformed);
    }
    let supported_versions = rest[..count].to_vec();
    let has_selected = rest[count];
    let selected_version = match has_selected {
        0 => None,
        1 => {
            let v = *rest.get(count + 1).ok_or(NegotiationError::Malformed)?;
            Some(v)
        }
        _ => return Err(NegotiationError::Malformed),
    };
    Ok(NegotiationMessage {
        supported_versions,
        selected_version,
    })
}

/// Encode a signed negotiation message: `unsigned || pubkey(32) || sig(64)`.
pub fn encode_signed(msg: &NegotiationMessage, public_key: &[u8; 32], signature: &[u8; 64]) -> Vec<u8> {
    let mut out = encode_unsigned(msg);
    out.extend_from_slice(public_key);
    out.extend_from_slice(signature);
    out
}

/// Decode and verify a signed negotiation message, returning the message
/// and the signer's public key.
pub fn decode_signed(bytes: &[u8]) -> Result<(NegotiationMessage, [u8; 32]), NegotiationError> {
    if bytes.len() < 32 + 64 {
        return Err(NegotiationError::Malformed);
    }
    let split = bytes.len() - 32 - 64;
    let (unsigned, tail) = bytes.split_at(split);
    let msg = decode_unsigned(unsigned)?;

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&tail[..32]);
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&tail[32..]);

    if !verify_signature(&public_key, unsigned, &signature) {
        return Err(NegotiationError::SignatureInvalid);
    }
    Ok((msg, public_key))
}

/// Outstanding negotiation requests awaiting a reply, keyed by an
/// application-chosen correlation id (typically the pending session id).
///
/// Insertion is drop-on-full: if an entry already exists for `id`, the new
/// waiter is dropped (never overwrites or blocks) and the caller is told so
/// via the return value, matching the rule that negotiation must never
/// backpressure the receive path.
#[derive(Default)]
pub struct PendingNegotiations {
    waiters: Mutex<HashMap<u32, oneshot::Sender<Result<u8, NegotiationError>>>>,
}

impl PendingNegotiations {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. Returns `None` if one was already
    /// pending for this id (the caller should log and drop its own).
    pub fn register(&self, id: u32) -> Option<oneshot::Receiver<Result<u8, NegotiationError>>> {
        let mut waiters = self.waiters.lock().expect("pending negotiations mutex poisoned");
        if waiters.contains_key(&id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        Some(rx)
    }

    /// Resolve the waiter for `id`, if any is still registered.
    pub fn resolve(&self, id: u32, result: Result<u8, NegotiationError>) {
        let mut waiters = self.waiters.lock().expect("pending negotiations mutex poisoned");
        if let Some(tx) = waiters.remove(&id) {
            let _ = tx.send(result);
        }
    }

    /// Drop a waiter without resolving it (e.g. on local cancellation).
    pub fn cancel(&self, id: u32) {
        let mut waiters = self.waiters.lock().expect("pending negotiations mutex poisoned");
        waiters.remove(&id);
    }
}

/// Wait for `id`'s negotiation reply, bounded by `timeout`.
pub async fn await_negotiation(
    rx: oneshot::Receiver<Result<u8, NegotiationError>>,
    timeout: Duration,
) -> Result<u8, NegotiationError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(NegotiationError::NegotiationTimeout(timeout)),
        Err(_) => Err(NegotiationError::NegotiationTimeout(timeout)),
    }
}
