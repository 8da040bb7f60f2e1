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

//! TOML-backed configuration (spec §9, ambient configuration surface).
//! Every component is constructed from one of these structs plus an
//! injected [`crate::clock::Clock`] and transport/relay handles; nothing in
//! this crate reads global or environment state.

use crate::negotiation::ProtocolCapabilities;
use crate::punch::HolePunchConfig;
use crate::relay::RelayServer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Session-lifecycle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are swept (spec §5).
    #[serde(with = "crate::serde_util::duration_millis")]
    pub idle_timeout: Duration,
    /// How often the idle sweep runs.
    #[serde(with = "crate::serde_util::duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Relay client configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayClientConfig {
    /// Relay servers to register with, in priority order.
    pub servers: Vec<RelayServer>,
}

/// Top-level configuration for the whole secure-transport core.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Version negotiation capabilities.
    pub negotiation: ProtocolCapabilities,
    /// Session lifecycle tuning.
    pub session: SessionConfig,
    /// Relay client configuration.
    pub relay: RelayClientConfig,
    /// Hole-punch tuning.
    pub hole_punch: HolePunchConfig,
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file's TOML failed to parse.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CoreConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
