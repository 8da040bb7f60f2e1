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

//! Time is a dependency (spec §9): every freshness check and every
//! attempt-spacing delay goes through this trait instead of the process
//! wall clock, so tests can pin time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of time for freshness checks (Unix seconds) and spacing/idle
/// timers (monotonic milliseconds).
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time, Unix seconds. Used for handshake and
    /// commitment freshness windows.
    fn unix_seconds(&self) -> u64;
    /// Monotonically increasing milliseconds, not tied to any epoch. Used
    /// for idle-session sweeps and hole-punch attempt spacing.
    fn monotonic_millis(&self) -> u64;
}

/// Shared handle to a `Clock`, the form components are constructed with.
pub type SharedClock = Arc<dyn Clock>;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Build a `SharedClock` wrapping the real system clock.
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn monotonic_millis(&self) -> u64 {
        process_start().elapsed().as_millis() as u64
    }
}

/// A clock tests can pin and advance by hand.
#[derive(Debug)]
pub struct FakeClock {
    unix: AtomicU64,
    mono: AtomicU64,
}

impl FakeClock {
    /// Start the fake clock at the given Unix time, monotonic clock at zero.
    pub fn new(unix_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            unix: AtomicU64::new(unix_seconds),
            mono: AtomicU64::new(0),
        })
    }

    /// Advance both the wall clock and the monotonic clock by `millis`.
    pub fn advance_millis(&self, millis: u64) {
        self.mono.fetch_add(millis, Ordering::SeqCst);
        self.unix.fetch_add(millis / 1000, Ordering::SeqCst);
    }

    /// Set the wall clock to an absolute Unix time, independent of the
    /// monotonic clock (useful for clock-skew scenarios).
    pub fn set_unix_seconds(&self, unix_seconds: u64) {
        self.unix.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn unix_seconds(&self) -> u64 {
        self.unix.load(Ordering::SeqCst)
    }

    fn monotonic_millis(&self) -> u64 {
        self.mono.load(Ordering::SeqCst)
    }
}
