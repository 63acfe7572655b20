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

//! Concentrator server
//!
//! [`VspcServer`] owns the TCP listeners: the VM-facing Telnet listener
//! and, when configured, the observer listener. Each accepted VM
//! connection gets a [`ConnectionWorker`](crate::ConnectionWorker); each
//! observer connection is driven by the observer module. The manager's
//! reaper runs alongside.

use crate::handler::VspcHandler;
use crate::manager::SessionManager;
use crate::observer;
use crate::types::{ConnectionId, ServerSnapshot};
use crate::worker::ConnectionWorker;
use crate::{Result, VspcConfig, VspcError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The virtual serial port concentrator server.
///
/// Binds its listeners in [`new`](Self::new); starts accepting in
/// [`start`](Self::start); runs until [`shutdown`](Self::shutdown).
pub struct VspcServer {
    config: VspcConfig,
    manager: Arc<SessionManager>,
    vm_listener: Arc<Mutex<TcpListener>>,
    observer_listener: Option<Arc<Mutex<TcpListener>>>,
    bind_address: SocketAddr,
    observer_address: Option<SocketAddr>,
    started_at: Instant,
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    next_connection_id: Arc<AtomicU64>,
    connection_count: Arc<AtomicUsize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VspcServer {
    /// Binds the configured listeners but does not accept yet.
    pub async fn new(config: VspcConfig) -> Result<Self> {
        let vm_listener = TcpListener::bind(config.listen_addr).await?;
        let bind_address = vm_listener.local_addr()?;
        info!("VM listener bound to {bind_address}");

        let (observer_listener, observer_address) = match config.observer_listen_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let actual = listener.local_addr()?;
                info!("observer listener bound to {actual}");
                (Some(Arc::new(Mutex::new(listener))), Some(actual))
            }
            None => (None, None),
        };

        let manager = Arc::new(SessionManager::new(config.clone()));

        Ok(Self {
            config,
            manager,
            vm_listener: Arc::new(Mutex::new(vm_listener)),
            observer_listener,
            bind_address,
            observer_address,
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            connection_count: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the accept loops and the manager's reaper.
    pub async fn start(&self, handler: Arc<dyn VspcHandler>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VspcError::Other("server already running".into()));
        }
        info!("starting concentrator on {}", self.bind_address);

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_vm_accept_loop(handler));
        if let Some(ref listener) = self.observer_listener {
            tasks.push(self.spawn_observer_accept_loop(listener.clone()));
        }
        tasks.push(self.manager.spawn_reaper());
        Ok(())
    }

    fn spawn_vm_accept_loop(&self, handler: Arc<dyn VspcHandler>) -> JoinHandle<()> {
        let listener = self.vm_listener.clone();
        let manager = self.manager.clone();
        let running = self.running.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let next_id = self.next_connection_id.clone();
        let connection_count = self.connection_count.clone();
        let max_connections = self.config.max_connections;

        tokio::spawn(async move {
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let accepted = tokio::select! {
                    result = async { listener.lock().await.accept().await } => result,
                    () = shutdown_notify.notified() => break,
                };
                match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!("accepted VM connection from {peer_addr}");
                        if connection_count.load(Ordering::Acquire) >= max_connections {
                            warn!(
                                "connection limit reached ({max_connections}), \
                                 rejecting {peer_addr}"
                            );
                            drop(socket);
                            continue;
                        }
                        let id = ConnectionId::new(next_id.fetch_add(1, Ordering::SeqCst));
                        match ConnectionWorker::new(id, socket, manager.clone(), handler.clone())
                        {
                            Ok(worker) => {
                                connection_count.fetch_add(1, Ordering::AcqRel);
                                let connection_count = connection_count.clone();
                                tokio::spawn(async move {
                                    worker.run().await;
                                    connection_count.fetch_sub(1, Ordering::AcqRel);
                                });
                            }
                            Err(e) => error!("failed to wrap connection: {e}"),
                        }
                    }
                    Err(e) => {
                        error!("failed to accept connection: {e}");
                        // Back off on errors to avoid a tight loop
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
            info!("VM accept loop terminated");
        })
    }

    fn spawn_observer_accept_loop(&self, listener: Arc<Mutex<TcpListener>>) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let shutdown_notify = self.shutdown_notify.clone();

        tokio::spawn(async move {
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let accepted = tokio::select! {
                    result = async { listener.lock().await.accept().await } => result,
                    () = shutdown_notify.notified() => break,
                };
                match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!("accepted observer connection from {peer_addr}");
                        let manager = manager.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(error) =
                                observer::run_observer(socket, manager, config).await
                            {
                                debug!(%peer_addr, %error, "observer connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept observer: {e}");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
            info!("observer accept loop terminated");
        })
    }

    /// Stops accepting, drains the sessions, and closes every connection.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(VspcError::ServerNotRunning);
        }
        info!("shutting down concentrator");

        self.shutdown_notify.notify_waiters();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.manager.shutdown().await;

        info!("concentrator shutdown complete");
        Ok(())
    }

    /// Whether the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The VM listener's actual bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// The observer listener's actual bind address, if configured.
    pub fn observer_address(&self) -> Option<SocketAddr> {
        self.observer_address
    }

    /// Number of live transport connections.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Acquire)
    }

    /// The session manager.
    pub fn manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    /// The server configuration.
    pub fn config(&self) -> &VspcConfig {
        &self.config
    }

    /// A point-in-time view of the server.
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_connections: self.connection_count(),
            sessions: self.manager.session_count(),
            bind_address: self.bind_address,
            observer_address: self.observer_address,
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for VspcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VspcServer")
            .field("bind_address", &self.bind_address)
            .field("running", &self.is_running())
            .field("connections", &self.connection_count())
            .field("sessions", &self.manager.session_count())
            .finish()
    }
}

impl Drop for VspcServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("VspcServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown_notify.notify_waiters();
        }
    }
}
