//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! VM transport connection handle
//!
//! [`VmConnection`] is the cheaply clonable write-side handle for one
//! transport connection. Output is serialized through a dedicated writer
//! task owning the socket's write half; the read side lives in the
//! [`ConnectionWorker`](crate::ConnectionWorker). Sessions hold a
//! `VmConnection` as their non-owning reference to the active (or pending
//! peer) transport, invalidated when the writer task ends.

use crate::types::ConnectionId;
use crate::{Result, VspcError};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tracing::{debug, trace};
use vspc_telnetcodec::{TelnetArgument, TelnetCodec, TelnetFrame, VmwareArgument};

/// Outbound work for the writer task.
#[derive(Debug)]
enum Outbound {
    /// A protocol frame
    Frame(TelnetFrame),
    /// Raw serial bytes, IAC-escaped on the wire
    Data(Bytes),
    /// Flush and close the transport
    Shutdown,
}

/// Clonable handle to one VM transport connection's write side.
#[derive(Clone, Debug)]
pub struct VmConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
}

impl VmConnection {
    /// Spawns the writer task for `write_half` and returns the handle.
    pub fn spawn(id: ConnectionId, peer_addr: SocketAddr, write_half: OwnedWriteHalf) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let bytes_sent = Arc::new(AtomicU64::new(0));
        let connection = Self {
            id,
            peer_addr,
            outbound: outbound_tx,
            bytes_sent: bytes_sent.clone(),
            bytes_received: Arc::new(AtomicU64::new(0)),
        };
        tokio::spawn(writer_task(id, write_half, outbound_rx, bytes_sent));
        connection
    }

    /// This connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Total bytes written to the wire.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total serial bytes received from this connection.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn add_bytes_received(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
    }

    /// Queues a protocol frame for transmission.
    pub async fn send_frame(&self, frame: TelnetFrame) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| VspcError::ConnectionClosed)
    }

    /// Queues several protocol frames in order.
    pub async fn send_frames(&self, frames: impl IntoIterator<Item = TelnetFrame>) -> Result<()> {
        for frame in frames {
            self.send_frame(frame).await?;
        }
        Ok(())
    }

    /// Queues serial data; IAC bytes are escaped on the wire.
    pub async fn send_data(&self, data: Bytes) -> Result<()> {
        self.outbound
            .send(Outbound::Data(data))
            .await
            .map_err(|_| VspcError::ConnectionClosed)
    }

    /// Queues a VMware extension subnegotiation.
    pub async fn send_subnegotiation(&self, argument: VmwareArgument) -> Result<()> {
        self.send_frame(TelnetFrame::Subnegotiate(TelnetArgument::Vmware(argument)))
            .await
    }

    /// Asks the writer task to flush and close the transport. Idempotent;
    /// a connection whose writer already ended reports success.
    pub async fn shutdown(&self) {
        let _ = self.outbound.send(Outbound::Shutdown).await;
    }
}

async fn writer_task(
    id: ConnectionId,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Outbound>,
    bytes_sent: Arc<AtomicU64>,
) {
    // Encoding is stateless with respect to negotiation, so the writer
    // keeps its own codec instance
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::with_capacity(4096);
    while let Some(item) = outbound.recv().await {
        wire.clear();
        let result = match item {
            Outbound::Frame(frame) => {
                trace!(connection_id = %id, %frame, "sending frame");
                codec.encode(frame, &mut wire)
            }
            Outbound::Data(data) => codec.encode(&data[..], &mut wire),
            Outbound::Shutdown => break,
        };
        if let Err(error) = result {
            debug!(connection_id = %id, %error, "encode failed, closing writer");
            break;
        }
        if let Err(error) = write_half.write_all(&wire).await {
            debug!(connection_id = %id, %error, "write failed, closing writer");
            break;
        }
        bytes_sent.fetch_add(wire.len() as u64, Ordering::Relaxed);
    }
    let _ = write_half.shutdown().await;
    debug!(connection_id = %id, "writer task ended");
}
