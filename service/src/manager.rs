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

//! Session manager
//!
//! The manager is the only process-wide structure: it maps VM identities to
//! sessions, arbitrates migration rendezvous between a source's
//! `VMOTION-BEGIN` and a destination's `VMOTION-PEER`, and runs the reaper
//! that expires overdue rendezvous and idle sessions.
//!
//! The rendezvous table sits behind a plain mutex; reservation, secret
//! verification and removal each take one critical section, so two
//! destinations racing for the same token cannot both win.

use crate::connection::VmConnection;
use crate::session::{CompleteOutcome, Session};
use crate::types::ConnectionId;
use crate::VspcConfig;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vspc_telnetcodec::VmwareArgument;

/// An outstanding migration rendezvous, keyed by the opaque id the source
/// host supplied in `VMOTION-BEGIN`.
#[derive(Debug, Clone)]
struct MigrationEntry {
    vm_uuid: String,
    secret: u64,
}

/// Maps identities to sessions and arbitrates migration rendezvous.
pub struct SessionManager {
    config: VspcConfig,
    sessions: DashMap<String, Arc<Session>>,
    names: DashMap<String, String>,
    migrations: Mutex<HashMap<Bytes, MigrationEntry>>,
}

impl SessionManager {
    /// Creates a manager with the given configuration.
    pub fn new(config: VspcConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            names: DashMap::new(),
            migrations: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this manager runs with.
    pub fn config(&self) -> &VspcConfig {
        &self.config
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Binds a connection to the session for `vm_uuid`, creating the
    /// session on first sight. A previous active connection is superseded
    /// and closed.
    pub async fn bind_connection(
        &self,
        vm_uuid: &str,
        connection: VmConnection,
        buffered: Option<Bytes>,
    ) -> Arc<Session> {
        let session = self
            .sessions
            .entry(vm_uuid.to_owned())
            .or_insert_with(|| {
                info!(vm_uuid, "creating session");
                Arc::new(Session::new(vm_uuid, &self.config))
            })
            .clone();
        if let Some(superseded) = session.attach_active(connection, buffered).await {
            superseded.shutdown().await;
        }
        session
    }

    /// Looks up a session by VM uuid.
    pub fn session_by_uuid(&self, vm_uuid: &str) -> Option<Arc<Session>> {
        self.sessions.get(vm_uuid).map(|entry| entry.clone())
    }

    /// Looks up a session by VM display name.
    pub fn session_by_name(&self, vm_name: &str) -> Option<Arc<Session>> {
        let vm_uuid = self.names.get(vm_name)?.clone();
        self.session_by_uuid(&vm_uuid)
    }

    /// Records the VM's display name and indexes it for observers.
    pub async fn set_vm_name(&self, session: &Arc<Session>, vm_name: String) {
        self.names
            .insert(vm_name.clone(), session.vm_uuid().to_owned());
        session.set_vm_name(vm_name).await;
    }

    /// Source side of the rendezvous: reserves `id`, generates the secret,
    /// and arms the session. Returns the secret to send in `GOAHEAD`, or
    /// `None` when the migration must be refused with `NOTNOW`.
    pub async fn begin_migration(
        &self,
        session: &Arc<Session>,
        from: ConnectionId,
        id: Bytes,
    ) -> Option<u64> {
        let secret = rand::random::<u64>();
        {
            let mut migrations = self.migrations.lock().expect("rendezvous table poisoned");
            if migrations.contains_key(&id) {
                warn!(vm_uuid = %session.vm_uuid(), "migration id already reserved");
                return None;
            }
            migrations.insert(
                id.clone(),
                MigrationEntry {
                    vm_uuid: session.vm_uuid().to_owned(),
                    secret,
                },
            );
        }
        if session
            .begin_migration(from, id.clone(), secret, self.config.t_goahead)
            .await
        {
            Some(secret)
        } else {
            self.unregister(&id);
            None
        }
    }

    /// Destination side of the rendezvous: verifies `(id, secret)` against
    /// the reservation and attaches `connection` as the pending peer.
    /// Returns the session on success; on any mismatch the caller emits no
    /// `PEER-OK` and lets the connection die.
    pub async fn claim_peer(
        &self,
        id: &Bytes,
        secret: u64,
        connection: VmConnection,
    ) -> Option<Arc<Session>> {
        let vm_uuid = {
            let migrations = self.migrations.lock().expect("rendezvous table poisoned");
            match migrations.get(id) {
                Some(entry) if entry.secret == secret => entry.vm_uuid.clone(),
                Some(_) => {
                    warn!("peer presented a bad rendezvous secret");
                    return None;
                }
                None => {
                    warn!("peer presented an unknown migration id");
                    return None;
                }
            }
        };
        let session = self.session_by_uuid(&vm_uuid)?;
        if session.claim_peer(connection, id, secret).await {
            Some(session)
        } else {
            None
        }
    }

    /// Destination side: `VMOTION-COMPLETE`. Returns `true` when a real
    /// handoff happened (as opposed to a tolerated duplicate).
    pub async fn complete_migration(
        &self,
        session: &Arc<Session>,
        from: ConnectionId,
    ) -> bool {
        match session.complete_migration(from).await {
            CompleteOutcome::Handoff { id, old } => {
                self.unregister(&id);
                if let Some(old) = old {
                    old.shutdown().await;
                }
                true
            }
            CompleteOutcome::Duplicate | CompleteOutcome::Rejected => false,
        }
    }

    /// Source side: `VMOTION-ABORT`. Returns `true` when a migration was
    /// actually outstanding.
    pub async fn abort_migration(&self, session: &Arc<Session>) -> bool {
        match session.abort_migration().await {
            Some((id, pending)) => {
                self.unregister(&id);
                if let Some(pending) = pending {
                    pending.shutdown().await;
                }
                true
            }
            None => false,
        }
    }

    /// A transport closed; the session transitions accordingly.
    pub async fn connection_closed(&self, session: &Arc<Session>, id: ConnectionId) {
        let outcome = session.connection_closed(id).await;
        debug!(vm_uuid = %session.vm_uuid(), %id, ?outcome, "connection closed");
    }

    fn unregister(&self, id: &Bytes) {
        self.migrations
            .lock()
            .expect("rendezvous table poisoned")
            .remove(id);
    }

    /// Spawns the reaper: expires overdue rendezvous (emitting `ABORT` to
    /// a still-attached source) and destroys sessions whose idle grace ran
    /// out.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.reap(Instant::now()).await;
            }
        })
    }

    /// One reaper pass.
    pub async fn reap(&self, now: Instant) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for session in &sessions {
            if let Some((id, source, pending)) = session.expire_migration(now).await {
                self.unregister(&id);
                if let Some(pending) = pending {
                    pending.shutdown().await;
                }
                if let Some(source) = source {
                    let _ = source
                        .send_subnegotiation(VmwareArgument::VMotionAbort(Some(
                            bytes::BytesMut::from(&id[..]),
                        )))
                        .await;
                }
            }
        }

        for session in sessions {
            if session
                .is_idle_expired(now, self.config.session_idle_grace)
                .await
            {
                self.destroy_session(session.vm_uuid()).await;
            }
        }
    }

    /// Removes one session and everything that points at it.
    async fn destroy_session(&self, vm_uuid: &str) {
        let Some((_, session)) = self.sessions.remove(vm_uuid) else {
            return;
        };
        info!(vm_uuid, "destroying idle session");
        session.close_all().await;
        self.names.retain(|_, uuid| uuid.as_str() != vm_uuid);
        self.migrations
            .lock()
            .expect("rendezvous table poisoned")
            .retain(|_, entry| entry.vm_uuid != vm_uuid);
    }

    /// Drains everything: closes all connections and clears the maps.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            session.close_all().await;
        }
        self.sessions.clear();
        self.names.clear();
        self.migrations
            .lock()
            .expect("rendezvous table poisoned")
            .clear();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
