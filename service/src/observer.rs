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

//! Observer connections and subscriber sinks
//!
//! Observers attach to a session and receive its serial stream; bytes they
//! send flow back to the VM. The wire protocol is a single subscribe line
//! (`uuid <vm_uuid>` or `name <vm_name>`) followed by raw bytes in both
//! directions.
//!
//! Delivery to a subscriber is never allowed to block or fail the serial
//! path: each subscriber has a byte-capped outbound queue, and one that
//! overflows is disconnected.

use crate::manager::SessionManager;
use crate::{Result, VspcConfig, VspcError};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A fan-out sink attached to a session.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
    queued: Arc<AtomicUsize>,
    queue_cap: usize,
}

impl Subscriber {
    /// Creates a subscriber with the given queue cap, returning the sink
    /// and the receiving end its writer drains.
    pub fn new(id: u64, queue_cap: usize) -> (Self, SubscriberRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        (
            Self {
                id,
                tx,
                queued: queued.clone(),
                queue_cap,
            },
            SubscriberRx { rx, queued },
        )
    }

    /// The subscriber's id within its session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Attempts to queue `bytes` for this subscriber. Returns `false` when
    /// the subscriber is gone or over its queue cap, in which case the
    /// caller disconnects it.
    pub fn try_deliver(&self, bytes: &Bytes) -> bool {
        let queued = self.queued.load(Ordering::Acquire);
        if queued + bytes.len() > self.queue_cap {
            return false;
        }
        self.queued.fetch_add(bytes.len(), Ordering::AcqRel);
        self.tx.send(bytes.clone()).is_ok()
    }
}

/// Receiving end of a subscriber's outbound queue.
#[derive(Debug)]
pub struct SubscriberRx {
    rx: mpsc::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
}

impl SubscriberRx {
    /// Waits for the next chunk, accounting it off the queue.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let bytes = self.rx.recv().await?;
        self.queued.fetch_sub(bytes.len(), Ordering::AcqRel);
        Some(bytes)
    }
}

/// Drives one observer connection to completion.
pub(crate) async fn run_observer(
    stream: TcpStream,
    manager: Arc<SessionManager>,
    config: VspcConfig,
) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    let (mut read_half, mut write_half) = stream.into_split();

    // Subscribe line: "uuid <vm_uuid>" or "name <vm_name>"
    let line = match timeout(
        config.admission_timeout,
        read_subscribe_line(&mut read_half),
    )
    .await
    {
        Ok(line) => line?,
        Err(_) => {
            debug!(%peer_addr, "observer sent no subscribe line, dropping");
            return Err(VspcError::Timeout);
        }
    };

    let session = match line.split_once(' ') {
        Some(("uuid", uuid)) => manager.session_by_uuid(uuid),
        Some(("name", name)) => manager.session_by_name(name),
        _ => None,
    };
    let Some(session) = session else {
        let _ = write_half.write_all(b"unknown vm\n").await;
        warn!(%peer_addr, subscribe = %line, "observer asked for unknown vm");
        return Err(VspcError::SessionNotFound(line));
    };

    let (subscriber, mut subscriber_rx) =
        Subscriber::new(session.next_subscriber_id(), config.per_subscriber_queue_bytes);
    let subscriber_id = subscriber.id();
    session.subscribe(subscriber).await;
    info!(%peer_addr, vm_uuid = %session.vm_uuid(), subscriber_id, "observer attached");

    // Writer: drain the subscriber queue onto the socket. The queue sender
    // is dropped by the session on overflow, which ends this task and in
    // turn the whole observer connection.
    let mut writer = tokio::spawn(async move {
        while let Some(bytes) = subscriber_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    // Reader: observer input flows to the VM's active connection
    let mut buffer = BytesMut::with_capacity(1024);
    loop {
        buffer.clear();
        tokio::select! {
            _ = &mut writer => {
                debug!(%peer_addr, "subscriber queue closed, dropping observer");
                break;
            }
            read = read_half.read_buf(&mut buffer) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(error) = session
                        .write_to_vm(Bytes::copy_from_slice(&buffer))
                        .await
                    {
                        debug!(vm_uuid = %session.vm_uuid(), %error, "observer input dropped");
                    }
                }
                Err(error) => {
                    debug!(%peer_addr, %error, "observer read failed");
                    break;
                }
            }
        }
    }

    session.unsubscribe(subscriber_id).await;
    if !writer.is_finished() {
        writer.abort();
    }
    info!(%peer_addr, subscriber_id, "observer detached");
    Ok(())
}

/// Reads one newline-terminated subscribe line, bounded to keep a hostile
/// observer from ballooning the buffer.
async fn read_subscribe_line(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = read_half.read(&mut byte).await?;
        if n == 0 {
            return Err(VspcError::ConnectionClosed);
        }
        match byte[0] {
            b'\n' => break,
            b'\r' => {}
            byte => line.push(byte),
        }
        if line.len() > 512 {
            return Err(VspcError::Other("subscribe line too long".into()));
        }
    }
    String::from_utf8(line).map_err(|_| VspcError::Other("subscribe line not UTF-8".into()))
}
