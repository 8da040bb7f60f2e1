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

//! Dispatches sends by endpoint kind to one of several underlays (spec §4.5).

use super::{PacketHandler, Transport, TransportError};
use crate::endpoint::{Endpoint, EndpointKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Multiplexes several underlays behind one [`Transport`], routing each
/// send by the target endpoint's [`EndpointKind`].
pub struct MultiTransport {
    datagram: Option<Arc<dyn Transport>>,
    stream: Option<Arc<dyn Transport>>,
}

impl MultiTransport {
    /// Build a multiplexer from the underlays present; either may be
    /// omitted if this node does not operate that underlay.
    pub fn new(datagram: Option<Arc<dyn Transport>>, stream: Option<Arc<dyn Transport>>) -> Self {
        Self { datagram, stream }
    }

    fn pick(&self, kind: EndpointKind) -> Option<&Arc<dyn Transport>> {
        match kind {
            EndpointKind::Datagram => self.datagram.as_ref(),
            EndpointKind::Stream => self.stream.as_ref(),
            EndpointKind::Relayed => None,
        }
    }
}

#[async_trait]
impl Transport for MultiTransport {
    async fn send(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        let underlay = self
            .pick(endpoint.kind())
            .ok_or_else(|| TransportError::Unreachable(endpoint.to_string()))?;
        underlay.send(endpoint, bytes).await
    }

    async fn send_or_connect(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        let underlay = self
            .pick(endpoint.kind())
            .ok_or_else(|| TransportError::Unreachable(endpoint.to_string()))?;
        underlay.send_or_connect(endpoint, bytes).await
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        None
    }

    fn register_handler(&self, handler: PacketHandler) {
        if let Some(datagram) = &self.datagram {
            datagram.register_handler(handler.clone());
        }
        if let Some(stream) = &self.stream {
            stream.register_handler(handler);
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut first_error = None;
        if let Some(datagram) = &self.datagram {
            if let Err(err) = datagram.close().await {
                first_error.get_or_insert(err);
            }
        }
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.close().await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
