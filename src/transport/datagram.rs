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

//! UDP-like one-shot datagram underlay (spec §4.5).

use super::{PacketHandler, Transport, TransportError};
use crate::endpoint::{Capability, Endpoint};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const MAX_DATAGRAM_LEN: usize = 65_507;

/// A datagram (UDP-like) transport bound to one local socket.
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    local: Endpoint,
    handler: Arc<Mutex<Option<PacketHandler>>>,
    closed: Arc<AtomicBool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl DatagramTransport {
    /// Bind a new datagram transport to `bind_addr` and start its receive
    /// loop.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;
        let local = Endpoint::datagram(local_addr, Capability::direct());

        let handler: Arc<Mutex<Option<PacketHandler>>> = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let recv_task = spawn_recv_loop(socket.clone(), handler.clone(), closed.clone());

        Ok(Self {
            socket,
            local,
            handler,
            closed,
            recv_task: Mutex::new(Some(recv_task)),
        })
    }
}

fn spawn_recv_loop(
    socket: Arc<UdpSocket>,
    handler: Arc<Mutex<Option<PacketHandler>>>,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    let handler = handler.lock().expect("datagram handler mutex poisoned").clone();
                    if let Some(handler) = handler {
                        let endpoint = Endpoint::datagram(from, Capability::direct());
                        handler(endpoint, buf[..len].to_vec());
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "datagram recv_from failed");
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
        }
    })
}

#[async_trait]
impl Transport for DatagramTransport {
    async fn send(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let addr = endpoint
            .socket_addr()
            .ok_or_else(|| TransportError::Unreachable(endpoint.to_string()))?;
        self.socket.send_to(bytes, addr).await?;
        Ok(())
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        Some(self.local.clone())
    }

    fn register_handler(&self, handler: PacketHandler) {
        *self.handler.lock().expect("datagram handler mutex poisoned") = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self.recv_task.lock().expect("recv task mutex poisoned").take() {
            task.abort();
        }
        Ok(())
    }
}
