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

//! Embedding hooks for the concentrator

use crate::types::ConnectionId;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Lifecycle hooks for embedding the concentrator.
///
/// All methods are async and default to doing nothing; implement the ones
/// you care about.
///
/// # Example
///
/// ```no_run
/// use vspc_service::{VspcHandler, ConnectionId};
/// use async_trait::async_trait;
///
/// struct Audit;
///
/// #[async_trait]
/// impl VspcHandler for Audit {
///     async fn on_session_bound(&self, id: ConnectionId, vm_uuid: &str) {
///         println!("{id} is {vm_uuid}");
///     }
/// }
/// ```
#[async_trait]
pub trait VspcHandler: Send + Sync + 'static {
    /// A transport connection was accepted.
    async fn on_connect(&self, _id: ConnectionId, _peer_addr: SocketAddr) {}

    /// A connection identified itself and was bound to its session.
    async fn on_session_bound(&self, _id: ConnectionId, _vm_uuid: &str) {}

    /// A migration was accepted and `GOAHEAD` sent.
    async fn on_migration_begin(&self, _vm_uuid: &str) {}

    /// A migration handoff committed; the session has a new active
    /// connection.
    async fn on_migration_complete(&self, _vm_uuid: &str) {}

    /// A migration was abandoned; the source remains active.
    async fn on_migration_abort(&self, _vm_uuid: &str) {}

    /// A transport connection went away.
    async fn on_disconnect(&self, _id: ConnectionId) {}
}
