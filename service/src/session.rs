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

//! Logical VM session
//!
//! A [`Session`] is the identity that survives reconnects and migrations.
//! It owns at most one active connection (the transport currently sourcing
//! the serial stream), at most one pending migration peer, the subscriber
//! fan-out, and the scrollback ring.
//!
//! All session state sits behind a single `tokio::sync::Mutex`; every
//! transition and every delivery runs inside one lock acquisition. That
//! lock is the session's egress ordering point: bytes delivered from the
//! old connection strictly precede bytes from the new one across a
//! migration handoff, and no task can observe a half-made transition.

use crate::connection::VmConnection;
use crate::observer::Subscriber;
use crate::scrollback::ScrollbackRing;
use crate::types::{ConnectionId, MigrationState, SessionSnapshot};
use crate::{Result, VspcConfig, VspcError};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Outcome of [`Session::complete_migration`].
#[derive(Debug)]
pub(crate) enum CompleteOutcome {
    /// The pending peer became active; the caller closes `old` and
    /// unregisters `id`.
    Handoff {
        /// Rendezvous id to unregister
        id: Bytes,
        /// The superseded source connection, if still attached
        old: Option<VmConnection>,
    },
    /// A repeat `COMPLETE` from the connection that already won the
    /// handoff; ignored.
    Duplicate,
    /// `COMPLETE` from a connection with no claim on this session.
    Rejected,
}

/// Outcome of [`Session::connection_closed`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClosedOutcome {
    /// The active connection went away
    WasActive,
    /// The pending migration peer went away
    WasPendingPeer,
    /// A connection this session no longer references
    Orphan,
}

#[derive(Debug)]
struct Migration {
    id: Bytes,
    secret: u64,
    state: MigrationState,
    deadline: Instant,
}

#[derive(Debug)]
struct SessionState {
    vm_name: Option<String>,
    vm_bios_uuid: Option<String>,
    vm_location_uuid: Option<String>,
    active: Option<VmConnection>,
    pending_peer: Option<VmConnection>,
    migration: Option<Migration>,
    subscribers: Vec<Subscriber>,
    scrollback: ScrollbackRing,
    /// Set while the session has neither an active nor a pending
    /// connection; drives idle-grace destruction
    detached_at: Option<Instant>,
}

impl SessionState {
    fn active_id(&self) -> Option<ConnectionId> {
        self.active.as_ref().map(VmConnection::id)
    }

    fn pending_id(&self) -> Option<ConnectionId> {
        self.pending_peer.as_ref().map(VmConnection::id)
    }

    fn update_detached(&mut self) {
        if self.active.is_none() && self.pending_peer.is_none() {
            if self.detached_at.is_none() {
                self.detached_at = Some(Instant::now());
            }
        } else {
            self.detached_at = None;
        }
    }

    fn fan_out(&mut self, vm_uuid: &str, bytes: &Bytes) {
        self.scrollback.push(bytes);
        self.subscribers.retain(|subscriber| {
            let delivered = subscriber.try_deliver(bytes);
            if !delivered {
                // Never let a slow observer stall the serial path
                warn!(
                    vm_uuid,
                    subscriber_id = subscriber.id(),
                    "subscriber overflowed its queue, disconnecting"
                );
            }
            delivered
        });
    }
}

/// The logical serial session of one VM.
pub struct Session {
    vm_uuid: String,
    t_complete: Duration,
    subscriber_ids: AtomicU64,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session for `vm_uuid` with the limits from `config`.
    pub fn new(vm_uuid: impl Into<String>, config: &VspcConfig) -> Self {
        Self {
            vm_uuid: vm_uuid.into(),
            t_complete: config.t_complete,
            subscriber_ids: AtomicU64::new(1),
            state: Mutex::new(SessionState {
                vm_name: None,
                vm_bios_uuid: None,
                vm_location_uuid: None,
                active: None,
                pending_peer: None,
                migration: None,
                subscribers: Vec::new(),
                scrollback: ScrollbackRing::new(config.scrollback_bytes),
                detached_at: Some(Instant::now()),
            }),
        }
    }

    /// Stable identity of the logical VM.
    pub fn vm_uuid(&self) -> &str {
        &self.vm_uuid
    }

    /// Allocates an id for a new subscriber.
    pub fn next_subscriber_id(&self) -> u64 {
        self.subscriber_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Binds `connection` as the active transport, superseding any
    /// previous one, and replays `buffered` admission data through the
    /// normal delivery path. Returns the superseded connection, which the
    /// caller closes.
    pub(crate) async fn attach_active(
        &self,
        connection: VmConnection,
        buffered: Option<Bytes>,
    ) -> Option<VmConnection> {
        let mut state = self.state.lock().await;
        let superseded = state.active.replace(connection);
        if let Some(ref old) = superseded {
            info!(
                vm_uuid = %self.vm_uuid,
                old = %old.id(),
                "new connection supersedes the active one"
            );
        }
        if let Some(buffered) = buffered.filter(|buffered| !buffered.is_empty()) {
            state.fan_out(&self.vm_uuid, &buffered);
        }
        state.update_detached();
        superseded
    }

    pub(crate) async fn set_vm_name(&self, name: String) {
        self.state.lock().await.vm_name = Some(name);
    }

    pub(crate) async fn set_vm_bios_uuid(&self, uuid: String) {
        self.state.lock().await.vm_bios_uuid = Some(uuid);
    }

    pub(crate) async fn set_vm_location_uuid(&self, uuid: String) {
        self.state.lock().await.vm_location_uuid = Some(uuid);
    }

    /// Delivers serial bytes decoded from connection `from`. Bytes from
    /// anything but the current active connection are dropped; after a
    /// handoff the superseded transport may still be draining, and its
    /// leftovers must not corrupt the spliced stream.
    pub async fn deliver(&self, from: ConnectionId, bytes: Bytes) {
        let mut state = self.state.lock().await;
        if state.active_id() != Some(from) {
            trace!(
                vm_uuid = %self.vm_uuid,
                %from,
                len = bytes.len(),
                "dropping data from non-active connection"
            );
            return;
        }
        state.fan_out(&self.vm_uuid, &bytes);
    }

    /// Attaches a subscriber: it receives the scrollback ring first, then
    /// live data.
    pub async fn subscribe(&self, subscriber: Subscriber) {
        let mut state = self.state.lock().await;
        let snapshot = state.scrollback.snapshot();
        if !snapshot.is_empty() && !subscriber.try_deliver(&snapshot) {
            warn!(
                vm_uuid = %self.vm_uuid,
                subscriber_id = subscriber.id(),
                "subscriber could not take the scrollback, dropping it"
            );
            return;
        }
        state.subscribers.push(subscriber);
    }

    /// Detaches a subscriber.
    pub async fn unsubscribe(&self, subscriber_id: u64) {
        let mut state = self.state.lock().await;
        state
            .subscribers
            .retain(|subscriber| subscriber.id() != subscriber_id);
    }

    /// Forwards observer input to the active connection. The send happens
    /// outside the session lock so a backpressured VM cannot stall
    /// delivery.
    pub async fn write_to_vm(&self, bytes: Bytes) -> Result<()> {
        let active = self.state.lock().await.active.clone();
        match active {
            Some(active) => active.send_data(bytes).await,
            None => Err(VspcError::ConnectionClosed),
        }
    }

    /// Source side: `VMOTION-BEGIN` on the active connection. Accepts only
    /// when no migration is outstanding; on success the session holds the
    /// rendezvous until `deadline` (now + `t_goahead`).
    pub(crate) async fn begin_migration(
        &self,
        from: ConnectionId,
        id: Bytes,
        secret: u64,
        t_goahead: Duration,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.active_id() != Some(from) {
            warn!(
                vm_uuid = %self.vm_uuid,
                %from,
                "migration request from a non-active connection refused"
            );
            return false;
        }
        if let Some(ref migration) = state.migration {
            warn!(
                vm_uuid = %self.vm_uuid,
                state = %migration.state,
                "migration request while one is outstanding refused"
            );
            return false;
        }
        debug!(vm_uuid = %self.vm_uuid, state = %MigrationState::SrcBegun, "migration accepted");
        state.migration = Some(Migration {
            id,
            secret,
            state: MigrationState::SrcGoaheadSent,
            deadline: Instant::now() + t_goahead,
        });
        true
    }

    /// Source side: `VMOTION-ABORT`. Returns the rendezvous id to
    /// unregister and the pending peer to close, if any.
    pub(crate) async fn abort_migration(&self) -> Option<(Bytes, Option<VmConnection>)> {
        let mut state = self.state.lock().await;
        let mut migration = state.migration.take()?;
        migration.state = MigrationState::Aborted;
        info!(
            vm_uuid = %self.vm_uuid,
            state = %migration.state,
            "migration aborted, source remains active"
        );
        let pending = state.pending_peer.take();
        state.update_detached();
        Some((migration.id, pending))
    }

    /// Destination side: a fresh connection presented `(id, secret)`.
    /// Accepts iff they match the outstanding `GOAHEAD` and no peer is
    /// attached yet; on success the connection becomes the pending peer
    /// and the rendezvous deadline extends to now + `t_complete`.
    pub(crate) async fn claim_peer(
        &self,
        connection: VmConnection,
        id: &Bytes,
        secret: u64,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.pending_peer.is_some() {
            warn!(vm_uuid = %self.vm_uuid, "peer claim while one is already attached refused");
            return false;
        }
        match state.migration {
            Some(ref mut migration)
                if migration.state == MigrationState::SrcGoaheadSent
                    && migration.id == *id
                    && migration.secret == secret =>
            {
                migration.state = MigrationState::DstConnected;
                trace!(vm_uuid = %self.vm_uuid, state = %migration.state, "peer matched");
                migration.state = MigrationState::DstPeerAccepted;
                migration.deadline = Instant::now() + self.t_complete;
            }
            _ => {
                warn!(vm_uuid = %self.vm_uuid, "peer claim did not match the rendezvous");
                return false;
            }
        }
        state.pending_peer = Some(connection);
        state.update_detached();
        true
    }

    /// Destination side: `VMOTION-COMPLETE` on the pending peer commits
    /// the handoff atomically: the peer becomes active, the rendezvous is
    /// cleared, and the superseded source is handed back for closing.
    pub(crate) async fn complete_migration(&self, from: ConnectionId) -> CompleteOutcome {
        let mut state = self.state.lock().await;
        let pending_matches = state.pending_id() == Some(from)
            && state
                .migration
                .as_ref()
                .is_some_and(|migration| migration.state == MigrationState::DstPeerAccepted);
        if pending_matches {
            let mut migration = state.migration.take().expect("checked above");
            migration.state = MigrationState::Completing;
            trace!(vm_uuid = %self.vm_uuid, state = %migration.state, "handing off");
            let old = state.active.take();
            state.active = state.pending_peer.take();
            state.update_detached();
            info!(vm_uuid = %self.vm_uuid, new_active = %from, "migration handoff complete");
            return CompleteOutcome::Handoff {
                id: migration.id,
                old,
            };
        }
        if state.migration.is_none() && state.active_id() == Some(from) {
            // The handoff already happened; the winner repeated itself
            debug!(vm_uuid = %self.vm_uuid, %from, "duplicate migration complete ignored");
            return CompleteOutcome::Duplicate;
        }
        warn!(vm_uuid = %self.vm_uuid, %from, "migration complete from an unrelated connection");
        CompleteOutcome::Rejected
    }

    /// A transport went away. The session transitions accordingly:
    /// a dropped source mid-migration leaves the rendezvous claimable for
    /// `t_complete`; a dropped pending peer returns the rendezvous to the
    /// source.
    pub(crate) async fn connection_closed(&self, id: ConnectionId) -> ClosedOutcome {
        let mut state = self.state.lock().await;
        if state.active_id() == Some(id) {
            state.active = None;
            if let Some(ref mut migration) = state.migration {
                if migration.state == MigrationState::SrcGoaheadSent {
                    migration.deadline = Instant::now() + self.t_complete;
                    debug!(
                        vm_uuid = %self.vm_uuid,
                        "source dropped mid-migration, rendezvous stays claimable"
                    );
                }
            }
            state.update_detached();
            return ClosedOutcome::WasActive;
        }
        if state.pending_id() == Some(id) {
            state.pending_peer = None;
            if let Some(ref mut migration) = state.migration {
                if migration.state == MigrationState::DstPeerAccepted {
                    migration.state = MigrationState::SrcGoaheadSent;
                    debug!(
                        vm_uuid = %self.vm_uuid,
                        "pending peer dropped, source remains active"
                    );
                }
            }
            state.update_detached();
            return ClosedOutcome::WasPendingPeer;
        }
        ClosedOutcome::Orphan
    }

    /// Reaper hook: expires an overdue rendezvous. Returns the id to
    /// unregister, the source to notify with `ABORT`, and the pending
    /// peer to close.
    pub(crate) async fn expire_migration(
        &self,
        now: Instant,
    ) -> Option<(Bytes, Option<VmConnection>, Option<VmConnection>)> {
        let mut state = self.state.lock().await;
        let overdue = state
            .migration
            .as_ref()
            .is_some_and(|migration| now >= migration.deadline);
        if !overdue {
            return None;
        }
        let mut migration = state.migration.take().expect("checked above");
        migration.state = MigrationState::Aborted;
        warn!(
            vm_uuid = %self.vm_uuid,
            state = %migration.state,
            "migration rendezvous timed out"
        );
        let pending = state.pending_peer.take();
        state.update_detached();
        Some((migration.id, state.active.clone(), pending))
    }

    /// Reaper hook: whether the session has sat with no connections for
    /// longer than `grace`.
    pub(crate) async fn is_idle_expired(&self, now: Instant, grace: Duration) -> bool {
        let state = self.state.lock().await;
        state
            .detached_at
            .is_some_and(|detached_at| now.duration_since(detached_at) >= grace)
    }

    /// Shuts down every transport and detaches all subscribers.
    pub(crate) async fn close_all(&self) {
        let mut state = self.state.lock().await;
        if let Some(active) = state.active.take() {
            active.shutdown().await;
        }
        if let Some(pending) = state.pending_peer.take() {
            pending.shutdown().await;
        }
        state.subscribers.clear();
        state.update_detached();
    }

    /// Current migration state.
    pub async fn migration_state(&self) -> MigrationState {
        let state = self.state.lock().await;
        state
            .migration
            .as_ref()
            .map_or(MigrationState::Idle, |migration| migration.state)
    }

    /// Non-blocking-ish view of the session.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            vm_uuid: self.vm_uuid.clone(),
            vm_name: state.vm_name.clone(),
            has_active: state.active.is_some(),
            has_pending_peer: state.pending_peer.is_some(),
            migration_state: state
                .migration
                .as_ref()
                .map_or(MigrationState::Idle, |migration| migration.state),
            subscribers: state.subscribers.len(),
            scrollback_len: state.scrollback.len(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("vm_uuid", &self.vm_uuid).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_connection(id: u64) -> (VmConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, peer_addr) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();
        let (_read, write) = server.into_split();
        (
            VmConnection::spawn(ConnectionId::new(id), peer_addr, write),
            client,
        )
    }

    fn test_config() -> VspcConfig {
        VspcConfig::new("127.0.0.1:0".parse().unwrap())
            .with_scrollback_bytes(64)
            .with_t_complete(Duration::from_secs(5))
    }

    async fn attached_subscriber(session: &Session) -> crate::observer::SubscriberRx {
        let (subscriber, rx) = Subscriber::new(session.next_subscriber_id(), 4096);
        session.subscribe(subscriber).await;
        rx
    }

    #[tokio::test]
    async fn delivers_only_from_the_active_connection() {
        let session = Session::new("vm-1", &test_config());
        let (active, _g1) = test_connection(1).await;
        let (stranger, _g2) = test_connection(2).await;
        session.attach_active(active, None).await;
        let mut rx = attached_subscriber(&session).await;

        session
            .deliver(ConnectionId::new(2), Bytes::from_static(b"noise"))
            .await;
        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"serial"))
            .await;
        drop(stranger);

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"serial")));
    }

    #[tokio::test]
    async fn late_subscriber_receives_scrollback_first() {
        let session = Session::new("vm-1", &test_config());
        let (active, _guard) = test_connection(1).await;
        session.attach_active(active, None).await;

        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"early "))
            .await;
        let mut rx = attached_subscriber(&session).await;
        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"late"))
            .await;

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"early ")));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"late")));
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_disconnected() {
        let session = Session::new("vm-1", &test_config());
        let (active, _guard) = test_connection(1).await;
        session.attach_active(active, None).await;

        let (subscriber, _rx) = Subscriber::new(session.next_subscriber_id(), 4);
        session.subscribe(subscriber).await;
        assert_eq!(session.snapshot().await.subscribers, 1);

        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"oversized"))
            .await;
        assert_eq!(session.snapshot().await.subscribers, 0);
    }

    #[tokio::test]
    async fn reconnect_supersedes_the_active_connection() {
        let session = Session::new("vm-1", &test_config());
        let (first, _g1) = test_connection(1).await;
        let (second, _g2) = test_connection(2).await;

        assert!(session.attach_active(first, None).await.is_none());
        let superseded = session.attach_active(second, None).await;
        assert_eq!(superseded.map(|old| old.id()), Some(ConnectionId::new(1)));
    }

    #[tokio::test]
    async fn migration_happy_path_splices_the_stream() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        let (destination, _g2) = test_connection(2).await;
        session.attach_active(source, None).await;
        let mut rx = attached_subscriber(&session).await;

        let id = Bytes::from_static(b"mig-1");
        assert!(
            session
                .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
                .await
        );
        assert_eq!(session.migration_state().await, MigrationState::SrcGoaheadSent);

        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"before "))
            .await;

        assert!(session.claim_peer(destination, &id, 7).await);
        assert_eq!(session.migration_state().await, MigrationState::DstPeerAccepted);

        // Source is still the serial path until COMPLETE
        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"during "))
            .await;

        let outcome = session.complete_migration(ConnectionId::new(2)).await;
        let CompleteOutcome::Handoff { id: done, old } = outcome else {
            panic!("expected handoff, got {outcome:?}");
        };
        assert_eq!(done, id);
        assert_eq!(old.map(|old| old.id()), Some(ConnectionId::new(1)));
        assert_eq!(session.migration_state().await, MigrationState::Idle);

        // Old connection leftovers are dropped, new connection delivers
        session
            .deliver(ConnectionId::new(1), Bytes::from_static(b"stale"))
            .await;
        session
            .deliver(ConnectionId::new(2), Bytes::from_static(b"after"))
            .await;

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"before ")));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"during ")));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"after")));
    }

    #[tokio::test]
    async fn peer_claim_requires_matching_secret() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        let (destination, _g2) = test_connection(2).await;
        session.attach_active(source, None).await;

        let id = Bytes::from_static(b"mig-1");
        session
            .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
            .await;

        assert!(!session.claim_peer(destination, &id, 8).await);
        assert_eq!(session.migration_state().await, MigrationState::SrcGoaheadSent);
        assert!(!session.snapshot().await.has_pending_peer);
    }

    #[tokio::test]
    async fn second_peer_claim_is_rejected() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        let (first, _g2) = test_connection(2).await;
        let (second, _g3) = test_connection(3).await;
        session.attach_active(source, None).await;

        let id = Bytes::from_static(b"mig-1");
        session
            .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
            .await;

        assert!(session.claim_peer(first, &id, 7).await);
        assert!(!session.claim_peer(second, &id, 7).await);
    }

    #[tokio::test]
    async fn second_begin_while_pending_is_refused() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        session.attach_active(source, None).await;

        assert!(
            session
                .begin_migration(
                    ConnectionId::new(1),
                    Bytes::from_static(b"a"),
                    1,
                    Duration::from_secs(5)
                )
                .await
        );
        assert!(
            !session
                .begin_migration(
                    ConnectionId::new(1),
                    Bytes::from_static(b"b"),
                    2,
                    Duration::from_secs(5)
                )
                .await
        );
    }

    #[tokio::test]
    async fn dropped_pending_peer_returns_rendezvous_to_source() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        let (destination, _g2) = test_connection(2).await;
        session.attach_active(source, None).await;

        let id = Bytes::from_static(b"mig-1");
        session
            .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
            .await;
        session.claim_peer(destination, &id, 7).await;

        let outcome = session.connection_closed(ConnectionId::new(2)).await;
        assert_eq!(outcome, ClosedOutcome::WasPendingPeer);
        assert_eq!(session.migration_state().await, MigrationState::SrcGoaheadSent);
        assert!(session.snapshot().await.has_active);

        // Another destination can still rendezvous
        let (retry, _g3) = test_connection(3).await;
        assert!(session.claim_peer(retry, &id, 7).await);
    }

    #[tokio::test]
    async fn dropped_source_keeps_rendezvous_claimable() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        session.attach_active(source, None).await;

        let id = Bytes::from_static(b"mig-1");
        session
            .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
            .await;

        let outcome = session.connection_closed(ConnectionId::new(1)).await;
        assert_eq!(outcome, ClosedOutcome::WasActive);
        assert_eq!(session.migration_state().await, MigrationState::SrcGoaheadSent);

        let (destination, _g2) = test_connection(2).await;
        assert!(session.claim_peer(destination, &id, 7).await);
        let outcome = session.complete_migration(ConnectionId::new(2)).await;
        assert!(matches!(outcome, CompleteOutcome::Handoff { old: None, .. }));
    }

    #[tokio::test]
    async fn duplicate_complete_is_idempotent() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        let (destination, _g2) = test_connection(2).await;
        session.attach_active(source, None).await;

        let id = Bytes::from_static(b"mig-1");
        session
            .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
            .await;
        session.claim_peer(destination, &id, 7).await;
        let first = session.complete_migration(ConnectionId::new(2)).await;
        assert!(matches!(first, CompleteOutcome::Handoff { .. }));

        let second = session.complete_migration(ConnectionId::new(2)).await;
        assert!(matches!(second, CompleteOutcome::Duplicate));
    }

    #[tokio::test]
    async fn abort_clears_the_rendezvous_and_keeps_the_source() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        let (destination, _g2) = test_connection(2).await;
        session.attach_active(source, None).await;

        let id = Bytes::from_static(b"mig-1");
        session
            .begin_migration(ConnectionId::new(1), id.clone(), 7, Duration::from_secs(5))
            .await;
        session.claim_peer(destination, &id, 7).await;

        let (aborted_id, pending) = session.abort_migration().await.unwrap();
        assert_eq!(aborted_id, id);
        assert_eq!(pending.map(|pending| pending.id()), Some(ConnectionId::new(2)));
        assert_eq!(session.migration_state().await, MigrationState::Idle);
        assert!(session.snapshot().await.has_active);
    }

    #[tokio::test]
    async fn expired_rendezvous_is_reaped() {
        let session = Session::new("vm-1", &test_config());
        let (source, _g1) = test_connection(1).await;
        session.attach_active(source, None).await;

        session
            .begin_migration(
                ConnectionId::new(1),
                Bytes::from_static(b"mig-1"),
                7,
                Duration::from_millis(1),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let expired = session.expire_migration(Instant::now()).await;
        let (id, source, pending) = expired.expect("rendezvous should have expired");
        assert_eq!(id, Bytes::from_static(b"mig-1"));
        assert!(source.is_some());
        assert!(pending.is_none());
        assert_eq!(session.migration_state().await, MigrationState::Idle);
    }

    #[tokio::test]
    async fn idle_grace_counts_from_detach() {
        let session = Session::new("vm-1", &test_config());
        let (active, _guard) = test_connection(1).await;

        // Never-connected sessions age from creation
        assert!(
            !session
                .is_idle_expired(Instant::now(), Duration::from_secs(60))
                .await
        );

        session.attach_active(active, None).await;
        assert!(
            !session
                .is_idle_expired(Instant::now() + Duration::from_secs(120), Duration::from_secs(60))
                .await
        );

        session.connection_closed(ConnectionId::new(1)).await;
        assert!(
            session
                .is_idle_expired(Instant::now() + Duration::from_secs(120), Duration::from_secs(60))
                .await
        );
    }
}
