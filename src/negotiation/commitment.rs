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

//! Downgrade-protected version commitment, piggybacked encrypted on the
//! second Noise handshake flight (spec §4.4).
//!
//! Binding the negotiated version to the handshake transcript hash means an
//! on-path attacker who strips or rewrites the cleartext negotiation phase
//! cannot also forge a commitment, since they cannot produce a valid MAC
//! without the transcript hash both ends independently derive.

use ring::hmac;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Encoded commitment length: `version(1) + timestamp(8) + mac(32)`.
pub const COMMITMENT_LEN: usize = 1 + 8 + 32;

/// Commitment window: a commitment timestamped more than this far in the
/// past, or more than `FUTURE_SKEW_SECS` ahead, is rejected as stale.
pub const PAST_WINDOW_SECS: u64 = 300;
/// Allowed clock-skew tolerance for a commitment timestamped in the future.
pub const FUTURE_SKEW_SECS: u64 = 60;

/// Commitment verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    /// The commitment's encoded length did not match [`COMMITMENT_LEN`].
    #[error("malformed commitment")]
    Malformed,
    /// The commitment's version byte did not match the version both sides
    /// believe they negotiated.
    #[error("commitment version mismatch")]
    Mismatch,
    /// The commitment's timestamp fell outside the freshness window.
    #[error("commitment timestamp outside freshness window")]
    Stale,
    /// The commitment's MAC did not verify against the transcript hash.
    #[error("commitment mac invalid")]
    MacInvalid,
}

fn compute_mac(transcript_hash: &[u8; 32], version: u8, timestamp: u64) -> [u8; 32] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, transcript_hash);
    let mut signed = Vec::with_capacity(9);
    signed.push(version);
    signed.extend_from_slice(&timestamp.to_be_bytes());
    let tag = hmac::sign(&key, &signed);
    let mut out = [0u8; 32];
    out.copy_from_slice(tag.as_ref());
    out
}

/// Build a commitment for `version` timestamped `now_unix_secs`, keyed by
/// the handshake transcript hash.
pub fn build(transcript_hash: &[u8; 32], version: u8, now_unix_secs: u64) -> [u8; COMMITMENT_LEN] {
    let mac = compute_mac(transcript_hash, version, now_unix_secs);
    let mut out = [0u8; COMMITMENT_LEN];
    out[0] = version;
    out[1..9].copy_from_slice(&now_unix_secs.to_be_bytes());
    out[9..].copy_from_slice(&mac);
    out
}

/// Verify a received commitment against the locally believed version and
/// transcript hash. Checks, in order: version match, freshness window,
/// then the MAC itself in constant time.
pub fn verify(
    transcript_hash: &[u8; 32],
    expected_version: u8,
    now_unix_secs: u64,
    commitment: &[u8],
) -> Result<(), CommitmentError> {
    if commitment.len() != COMMITMENT_LEN {
        return Err(CommitmentError::Malformed);
    }
    let version = commitment[0];
    let timestamp = u64::from_be_bytes(commitment[1..9].try_into().unwrap());
    let mac = &commitment[9..];

    if version != expected_version {
        return Err(CommitmentError::Mismatch);
    }

    let too_old = now_unix_secs.saturating_sub(timestamp) > PAST_WINDOW_SECS;
    let too_new = timestamp.saturating_sub(now_unix_secs) > FUTURE_SKEW_SECS;
    if too_old || too_new {
        return Err(CommitmentError::Stale);
    }

    let expected_mac = compute_mac(transcript_hash, version, timestamp);
    if expected_mac.ct_eq(mac).unwrap_u8() != 1 {
        return Err(CommitmentError::MacInvalid);
    }
    Ok(())
}
