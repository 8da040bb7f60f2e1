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

//! Crate-level error aggregation. Individual modules define narrow error
//! enums of their own; `CoreError` exists only for call sites that operate
//! across several modules at once (the facade, the router).

use thiserror::Error;

/// Errors surfaced by the crate's top-level entry points.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A codec-level framing error.
    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
    /// A session/handshake-level error.
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),
    /// A version-negotiation error.
    #[error(transparent)]
    Negotiation(#[from] crate::negotiation::NegotiationError),
    /// An underlay transport error.
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
    /// A relay-client error.
    #[error(transparent)]
    Relay(#[from] crate::relay::RelayError),
    /// A hole-punch error.
    #[error(transparent)]
    Punch(#[from] crate::punch::PunchError),
    /// An identity persistence/generation error.
    #[error(transparent)]
    Identity(#[from] crate::identity::IdentityError),
    /// No handler was registered for an inbound extension-range packet type.
    #[error("no handler registered for packet type {0}")]
    NoHandler(u8),
    /// A send could not be completed by any available path.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Convenience alias for crate-level fallible operations.
pub type Result<T> = std::result::Result<T, CoreError>;
