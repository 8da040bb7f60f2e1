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

//! UDP hole punching (spec §4.6): a small per-target state machine driven
//! directly over a raw socket, independent of the [`crate::transport`]
//! abstraction since a punch attempt is a burst of best-effort probes, not
//! a framed send.

use crate::clock::SharedClock;
use crate::endpoint::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Hole-punch configuration (spec §9, ambient configuration surface).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HolePunchConfig {
    /// Maximum probe attempts per target before giving up.
    pub max_attempts: u32,
    /// Delay between successive probes to the same target.
    #[serde(with = "crate::serde_util::duration_millis")]
    pub retry_interval: Duration,
    /// Overall deadline for one punch attempt.
    #[serde(with = "crate::serde_util::duration_millis")]
    pub overall_timeout: Duration,
}

impl Default for HolePunchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_interval: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a punch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PunchResult {
    /// A probe reply was observed from the target.
    Success,
    /// No reply arrived before `overall_timeout`.
    TimedOut,
}

/// Hole-punch errors.
#[derive(Debug, Error)]
pub enum PunchError {
    /// The underlying socket operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The caller cancelled the attempt before it resolved.
    #[error("punch cancelled")]
    Cancelled,
    /// The target explicitly rejected the punch request.
    #[error("punch rejected by target")]
    PunchRejected,
}

/// Per-attempt deadline for observing a reply on the shared socket (spec §4.6).
const READ_DEADLINE: Duration = Duration::from_millis(500);

/// Payloads that count as a successful punch reply from the target.
const VALID_REPLIES: [&[u8]; 3] = [b"PUNCH_RESPONSE", b"PONG", b"ACK"];

/// Payload the target sends to explicitly decline the punch.
const REJECT_REPLY: &[u8] = b"PUNCH_REJECT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PunchState {
    Idle,
    Attempting(u32),
    Success,
    TimedOut,
}

/// A lightweight cooperative cancellation signal, since pulling in a whole
/// cancellation-token crate for one boolean flag would be overkill.
#[derive(Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// A token that starts uncancelled.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signal cancellation, waking anyone waiting on [`Self::cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves once [`Self::cancel`] has been called.
    pub async fn cancelled(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        self.notify.notified().await;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct PendingPunch {
    state: PunchState,
}

/// Drives hole-punch attempts toward NAT-bound targets over a shared UDP
/// socket (spec §4.6).
pub struct HolePuncher {
    socket: Arc<UdpSocket>,
    config: HolePunchConfig,
    clock: SharedClock,
    pending: Mutex<HashMap<SocketAddr, PendingPunch>>,
}

/// A local candidate endpoint considered for the probe source, scored by
/// [`Capability::score`] so the most promising local address is used first.
#[derive(Clone, Copy, Debug)]
pub struct LocalCandidate {
    /// The candidate's local socket address.
    pub addr: SocketAddr,
    /// The candidate's capability descriptor.
    pub capability: Capability,
}

/// Pick the highest-scoring local candidate, preferring the first entry on
/// a tie (spec §4.6).
pub fn best_local_candidate(candidates: &[LocalCandidate]) -> Option<LocalCandidate> {
    candidates
        .iter()
        .copied()
        .max_by_key(|c| c.capability.score())
}

impl HolePuncher {
    /// Build a hole puncher driven over an already-bound UDP socket.
    pub fn new(socket: Arc<UdpSocket>, config: HolePunchConfig, clock: SharedClock) -> Self {
        Self {
            socket,
            config,
            clock,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to punch a hole to `target`, probing up to `max_attempts`
    /// times spaced by `retry_interval`, bounded by `overall_timeout`.
    pub async fn punch(
        &self,
        target: SocketAddr,
        probe_payload: &[u8],
        cancel: Arc<CancelToken>,
    ) -> Result<PunchResult, PunchError> {
        {
            let mut pending = self.pending.lock().expect("hole punch mutex poisoned");
            pending.insert(target, PendingPunch { state: PunchState::Idle });
        }

        let deadline = self.clock.monotonic_millis() + self.config.overall_timeout.as_millis() as u64;
        let mut buf = [0u8; 512];

        for attempt in 0..self.config.max_attempts {
            if cancel.is_cancelled() {
                self.set_state(target, PunchState::TimedOut);
                return Err(PunchError::Cancelled);
            }
            let now = self.clock.monotonic_millis();
            if now >= deadline {
                break;
            }
            self.set_state(target, PunchState::Attempting(attempt));
            self.socket.send_to(probe_payload, target).await?;

            let remaining = deadline - now;
            let read_deadline = READ_DEADLINE.min(Duration::from_millis(remaining));

            let reply = tokio::select! {
                res = self.socket.recv_from(&mut buf) => Some(res),
                _ = tokio::time::sleep(read_deadline) => None,
                _ = cancel.cancelled() => {
                    self.set_state(target, PunchState::TimedOut);
                    return Err(PunchError::Cancelled);
                }
            };

            if let Some(Ok((n, from))) = reply {
                if from == target {
                    let payload = &buf[..n];
                    if payload == REJECT_REPLY {
                        self.set_state(target, PunchState::TimedOut);
                        return Err(PunchError::PunchRejected);
                    }
                    if VALID_REPLIES.contains(&payload) {
                        self.mark_success(target);
                        return Ok(PunchResult::Success);
                    }
                }
            }

            if attempt + 1 < self.config.max_attempts {
                let backoff = Duration::from_millis(100 * (attempt as u64 + 1));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        self.set_state(target, PunchState::TimedOut);
                        return Err(PunchError::Cancelled);
                    }
                }
            }
        }

        self.set_state(target, PunchState::TimedOut);
        Ok(PunchResult::TimedOut)
    }

    /// Mark `target` as successfully punched (called once a reply from the
    /// target is observed on the shared socket's receive loop).
    pub fn mark_success(&self, target: SocketAddr) {
        self.set_state(target, PunchState::Success);
    }

    /// Launch punches to every target in `targets` concurrently, returning
    /// once all have resolved.
    pub async fn simultaneous_punch(
        &self,
        targets: &[SocketAddr],
        probe_payload: &[u8],
        cancel: Arc<CancelToken>,
    ) -> Vec<(SocketAddr, Result<PunchResult, PunchError>)> {
        let mut results = Vec::with_capacity(targets.len());
        for &target in targets {
            let result = self.punch(target, probe_payload, cancel.clone()).await;
            results.push((target, result));
        }
        results
    }

    fn set_state(&self, target: SocketAddr, state: PunchState) {
        let mut pending = self.pending.lock().expect("hole punch mutex poisoned");
        if let Some(entry) = pending.get_mut(&target) {
            entry.state = state;
        } else {
            pending.insert(target, PendingPunch { state });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::endpoint::Capability;

    #[tokio::test]
    async fn punch_times_out_without_a_reply() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let config = HolePunchConfig {
            max_attempts: 2,
            retry_interval: Duration::from_millis(5),
            overall_timeout: Duration::from_millis(50),
        };
        let puncher = HolePuncher::new(socket, config, SystemClock::shared());
        let result = puncher.punch(target, b"probe", CancelToken::new()).await.unwrap();
        assert_eq!(result, PunchResult::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_attempt() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let config = HolePunchConfig {
            max_attempts: 100,
            retry_interval: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(60),
        };
        let puncher = HolePuncher::new(socket, config, SystemClock::shared());
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let result = puncher.punch(target, b"probe", cancel).await;
        assert!(matches!(result, Err(PunchError::Cancelled)));
    }

    #[tokio::test]
    async fn punch_succeeds_on_a_valid_reply_from_the_target() {
        let socket_a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let socket_b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target = socket_b.local_addr().unwrap();

        let responder = socket_b.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            responder.send_to(b"PONG", from).await.unwrap();
        });

        let config = HolePunchConfig {
            max_attempts: 5,
            retry_interval: Duration::from_millis(5),
            overall_timeout: Duration::from_secs(2),
        };
        let puncher = HolePuncher::new(socket_a, config, SystemClock::shared());
        let result = puncher.punch(target, b"probe", CancelToken::new()).await.unwrap();
        assert_eq!(result, PunchResult::Success);
    }

    #[tokio::test]
    async fn punch_is_rejected_when_the_target_declines() {
        let socket_a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let socket_b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target = socket_b.local_addr().unwrap();

        let responder = socket_b.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            responder.send_to(b"PUNCH_REJECT", from).await.unwrap();
        });

        let config = HolePunchConfig {
            max_attempts: 5,
            retry_interval: Duration::from_millis(5),
            overall_timeout: Duration::from_secs(2),
        };
        let puncher = HolePuncher::new(socket_a, config, SystemClock::shared());
        let result = puncher.punch(target, b"probe", CancelToken::new()).await;
        assert!(matches!(result, Err(PunchError::PunchRejected)));
    }

    #[tokio::test]
    async fn punch_ignores_replies_from_an_unexpected_source() {
        let socket_a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let socket_b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let stranger = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let target = socket_b.local_addr().unwrap();

        let forged = stranger.clone();
        let victim_addr = socket_a.local_addr().unwrap();
        tokio::spawn(async move {
            forged.send_to(b"PONG", victim_addr).await.unwrap();
        });

        let config = HolePunchConfig {
            max_attempts: 2,
            retry_interval: Duration::from_millis(5),
            overall_timeout: Duration::from_millis(200),
        };
        let puncher = HolePuncher::new(socket_a, config, SystemClock::shared());
        let result = puncher.punch(target, b"probe", CancelToken::new()).await.unwrap();
        assert_eq!(result, PunchResult::TimedOut);
    }

    #[test]
    fn best_local_candidate_prefers_highest_score() {
        let candidates = vec![
            LocalCandidate {
                addr: "127.0.0.1:1".parse().unwrap(),
                capability: Capability::proxied(),
            },
            LocalCandidate {
                addr: "127.0.0.1:2".parse().unwrap(),
                capability: Capability::direct(),
            },
        ];
        let best = best_local_candidate(&candidates).unwrap();
        assert_eq!(best.addr, "127.0.0.1:2".parse::<SocketAddr>().unwrap());
    }
}
