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

//! Framed, connection-oriented stream underlay (spec §4.5), TCP-like.
//!
//! Connections are opened lazily on first send and evicted on any write
//! error; a length-prefixed frame (`[len(4, be)][bytes]`) delimits packets
//! on the wire since a stream carries no inherent message boundaries.

use super::{PacketHandler, Transport, TransportError};
use crate::endpoint::{Capability, Endpoint};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

async fn write_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<(), TransportError> {
    let len = bytes.len() as u32;
    tokio::time::timeout(WRITE_DEADLINE, async {
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| TransportError::Timeout)??;
    Ok(())
}

async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds maximum length",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// A framed stream (TCP-like) transport. Outbound connections are opened
/// lazily; inbound connections are accepted on a listener loop. Every
/// connection is split once into a read half (driven by a reader task) and
/// a write half (driven by `send`).
pub struct StreamTransport {
    listener_addr: SocketAddr,
    connections: AsyncMutex<HashMap<String, OwnedWriteHalf>>,
    handler: Mutex<Option<PacketHandler>>,
    closed: AtomicBool,
    /// Set once in `bind`, so methods that need to spawn a task holding a
    /// strong reference to this transport can get one from `&self` alone —
    /// required because `Transport::send_or_connect` only gets `&self`, not
    /// the `Arc<Self>` that owns it.
    self_weak: OnceLock<Weak<Self>>,
}

impl StreamTransport {
    /// Bind a new stream transport to `bind_addr` and start accepting
    /// inbound connections.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let listener_addr = listener.local_addr()?;

        let this = Arc::new(StreamTransport {
            listener_addr,
            connections: AsyncMutex::new(HashMap::new()),
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            self_weak: OnceLock::new(),
        });
        let _ = this.self_weak.set(Arc::downgrade(&this));

        let weak_for_accept = Arc::downgrade(&this);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let Some(strong) = weak_for_accept.upgrade() else { return };
                        if strong.closed.load(Ordering::SeqCst) {
                            return;
                        }
                        strong.adopt(stream, peer_addr).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "stream listener accept failed");
                        return;
                    }
                }
            }
        });

        Ok(this)
    }

    async fn adopt(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let key = format!("tcp://{peer_addr}");
        let (read_half, write_half) = stream.into_split();
        self.connections.lock().await.insert(key.clone(), write_half);
        self.spawn_reader(read_half, peer_addr, key);
    }

    fn spawn_reader(
        &self,
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        peer_addr: SocketAddr,
        key: String,
    ) {
        let Some(this) = self.self_weak.get().and_then(Weak::upgrade) else { return };
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(bytes) => {
                        let handler =
                            this.handler.lock().expect("stream handler mutex poisoned").clone();
                        if let Some(handler) = handler {
                            let endpoint = Endpoint::stream(peer_addr, Capability::direct());
                            handler(endpoint, bytes);
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, %key, "stream connection closed");
                        this.connections.lock().await.remove(&key);
                        return;
                    }
                }
            }
        });
    }

    async fn connection_for(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let key = endpoint.as_str().to_string();
        if self.connections.lock().await.contains_key(&key) {
            return Ok(());
        }
        let addr = endpoint
            .socket_addr()
            .ok_or_else(|| TransportError::Unreachable(key.clone()))?;
        let stream = TcpStream::connect(addr).await?;
        self.adopt(stream, addr).await;
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let key = endpoint.as_str().to_string();
        let mut connections = self.connections.lock().await;
        let writer = connections
            .get_mut(&key)
            .ok_or_else(|| TransportError::Unreachable(key.clone()))?;

        match write_frame(writer, bytes).await {
            Ok(()) => Ok(()),
            Err(err) => {
                connections.remove(&key);
                Err(err)
            }
        }
    }

    async fn send_or_connect(&self, endpoint: &Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.connection_for(endpoint).await?;
        self.send(endpoint, bytes).await
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        Some(Endpoint::stream(self.listener_addr, Capability::direct()))
    }

    fn register_handler(&self, handler: PacketHandler) {
        *self.handler.lock().expect("stream handler mutex poisoned") = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connections.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn connects_lazily_and_delivers_a_frame() {
        let a = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        b.register_handler(Arc::new(move |_ep, bytes| {
            assert_eq!(bytes, b"hello stream");
            received_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let b_endpoint = b.local_endpoint().unwrap();
        a.send_or_connect(&b_endpoint, b"hello stream").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let a = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        a.close().await.unwrap();
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_without_prior_connect_fails() {
        let a = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = StreamTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let endpoint = b.local_endpoint().unwrap();
        assert!(matches!(
            Transport::send(a.as_ref(), &endpoint, b"x").await,
            Err(TransportError::Unreachable(_))
        ));
    }
}
