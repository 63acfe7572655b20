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

//! Core types for the concentrator

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identifier of one transport connection. Allocated monotonically by the
/// accept loop and never reused, so a stale id can never alias a live
/// connection inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State of a session's migration rendezvous.
///
/// `SrcBegun`, `DstConnected`, `Completing` and `Aborted` are transient:
/// they are entered and left within a single critical section of the
/// session lock, so other tasks only ever observe `Idle`,
/// `SrcGoaheadSent` or `DstPeerAccepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// No migration in progress
    Idle,
    /// `VMOTION-BEGIN` received, decision pending
    SrcBegun,
    /// `VMOTION-GOAHEAD` emitted; waiting for the destination
    SrcGoaheadSent,
    /// A destination connection presented a matching rendezvous token
    DstConnected,
    /// `VMOTION-PEER-OK` emitted; waiting for `VMOTION-COMPLETE`
    DstPeerAccepted,
    /// Handoff in progress
    Completing,
    /// Migration abandoned
    Aborted,
}

impl MigrationState {
    /// Whether a rendezvous token is outstanding in this state.
    pub fn has_rendezvous(self) -> bool {
        matches!(
            self,
            Self::SrcGoaheadSent | Self::DstConnected | Self::DstPeerAccepted | Self::Completing
        )
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SrcBegun => write!(f, "src-begun"),
            Self::SrcGoaheadSent => write!(f, "src-goahead-sent"),
            Self::DstConnected => write!(f, "dst-connected"),
            Self::DstPeerAccepted => write!(f, "dst-peer-accepted"),
            Self::Completing => write!(f, "completing"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Session state snapshot (for non-blocking queries)
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Stable identity of the logical VM
    pub vm_uuid: String,
    /// Display name, if the VM announced one
    pub vm_name: Option<String>,
    /// Whether a transport is currently sourcing the serial stream
    pub has_active: bool,
    /// Whether a migration peer is attached
    pub has_pending_peer: bool,
    /// Current migration state
    pub migration_state: MigrationState,
    /// Number of attached subscribers
    pub subscribers: usize,
    /// Bytes currently held in the scrollback ring
    pub scrollback_len: usize,
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of live transport connections
    pub active_connections: usize,
    /// Number of live sessions
    pub sessions: usize,
    /// VM listener bind address
    pub bind_address: SocketAddr,
    /// Observer listener bind address, if configured
    pub observer_address: Option<SocketAddr>,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VspcServer {{ connections: {}, sessions: {}, addr: {}, uptime: {:?} }}",
            self.active_connections, self.sessions, self.bind_address, self.uptime
        )
    }
}
