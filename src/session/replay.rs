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

//! 64-entry sliding-bitmap replay window (spec §4.3, invariant "no counter
//! is ever admitted twice").

/// Tracks which of the last 64 message counters have already been admitted.
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    highest: Option<u64>,
    bitmap: u64,
}

impl ReplayWindow {
    /// A fresh window that has admitted nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to admit counter `n`. Returns `true` and records it if this
    /// is the first time `n` has been seen; returns `false` (and leaves the
    /// window unchanged) for a replay or a counter too old to track.
    pub fn admit(&mut self, n: u64) -> bool {
        match self.highest {
            None => {
                self.highest = Some(n);
                self.bitmap = 1;
                true
            }
            Some(highest) if n > highest => {
                let shift = n - highest;
                self.bitmap = if shift >= 64 { 0 } else { self.bitmap << shift };
                self.bitmap |= 1;
                self.highest = Some(n);
                true
            }
            Some(highest) => {
                let back = highest - n;
                if back >= 64 {
                    return false;
                }
                let bit = 1u64 << back;
                if self.bitmap & bit != 0 {
                    false
                } else {
                    self.bitmap |= bit;
                    true
                }
            }
        }
    }
}
