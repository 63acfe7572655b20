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

//! Concentrator configuration
//!
//! # Examples
//!
//! ```
//! use vspc_service::VspcConfig;
//! use std::time::Duration;
//!
//! let config = VspcConfig::new("0.0.0.0:13370".parse().unwrap())
//!     .with_observer_listen_addr(Some("127.0.0.1:13371".parse().unwrap()))
//!     .with_session_idle_grace(Duration::from_secs(120));
//! ```

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the concentrator.
#[derive(Debug, Clone)]
pub struct VspcConfig {
    /// Address the VM-facing Telnet listener binds to
    pub listen_addr: SocketAddr,

    /// Address of the optional observer listener
    pub observer_listen_addr: Option<SocketAddr>,

    /// How long a connection may exist without identifying itself via
    /// `VC-UUID` (or a successful `VMOTION-PEER` claim) before it is dropped
    pub admission_timeout: Duration,

    /// How long a source waits for a destination after `VMOTION-GOAHEAD`
    pub t_goahead: Duration,

    /// Hypervisor-side deadline between connecting and `VMOTION-PEER-OK`;
    /// kept for reference, the concentrator's own cover for unauthenticated
    /// peers is `admission_timeout`
    pub t_peer: Duration,

    /// How long a rendezvous stays claimable between `VMOTION-PEER-OK`
    /// (or a dropped source) and `VMOTION-COMPLETE`
    pub t_complete: Duration,

    /// How long a session lingers with no active and no pending connection
    /// before it is destroyed
    pub session_idle_grace: Duration,

    /// Capacity of the per-session scrollback ring replayed to new
    /// subscribers
    pub scrollback_bytes: usize,

    /// Outbound queue cap per subscriber; a subscriber that falls further
    /// behind is disconnected
    pub per_subscriber_queue_bytes: usize,

    /// Cap on serial data buffered before the `VC-UUID` binding; oldest
    /// bytes are discarded beyond this
    pub admission_buffer_bytes: usize,

    /// Whether `VMOTION-BEGIN` is answered with `GOAHEAD` (`true`) or
    /// `NOTNOW` (`false`)
    pub accept_vmotion: bool,

    /// Maximum number of simultaneous transport connections
    pub max_connections: usize,
}

impl Default for VspcConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:13370".parse().expect("valid address"),
            observer_listen_addr: None,
            admission_timeout: Duration::from_secs(10),
            t_goahead: Duration::from_secs(300), // 5 minutes
            t_peer: Duration::from_secs(30),
            t_complete: Duration::from_secs(300), // 5 minutes
            session_idle_grace: Duration::from_secs(60),
            scrollback_bytes: 64 * 1024,
            per_subscriber_queue_bytes: 1024 * 1024,
            admission_buffer_bytes: 64 * 1024,
            accept_vmotion: true,
            max_connections: 1024,
        }
    }
}

impl VspcConfig {
    /// Create a configuration listening on the given address.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    /// Set the observer listener address.
    pub fn with_observer_listen_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.observer_listen_addr = addr;
        self
    }

    /// Set the admission timeout.
    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }

    /// Set the source-side goahead timeout.
    pub fn with_t_goahead(mut self, timeout: Duration) -> Self {
        self.t_goahead = timeout;
        self
    }

    /// Set the rendezvous completion timeout.
    pub fn with_t_complete(mut self, timeout: Duration) -> Self {
        self.t_complete = timeout;
        self
    }

    /// Set the session idle grace period.
    pub fn with_session_idle_grace(mut self, grace: Duration) -> Self {
        self.session_idle_grace = grace;
        self
    }

    /// Set the scrollback ring capacity.
    pub fn with_scrollback_bytes(mut self, bytes: usize) -> Self {
        self.scrollback_bytes = bytes;
        self
    }

    /// Set the per-subscriber outbound queue cap.
    pub fn with_per_subscriber_queue_bytes(mut self, bytes: usize) -> Self {
        self.per_subscriber_queue_bytes = bytes;
        self
    }

    /// Set the migration acceptance policy.
    pub fn with_accept_vmotion(mut self, accept: bool) -> Self {
        self.accept_vmotion = accept;
        self
    }

    /// Set the connection limit.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}
