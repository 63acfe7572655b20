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

//! # vSPC Service
//!
//! The virtual serial port concentrator: a long-lived TCP server that
//! terminates Telnet connections opened by hypervisor-hosted VMs exposing a
//! serial port, and fans each VM's serial byte stream out to observers.
//!
//! The distinguishing responsibility is preserving a logical serial session
//! across live migration (vMotion): when a VM moves between hosts, the
//! connections from the source and destination host are stitched into one
//! logical [`Session`] with no loss, duplication, or reordering of serial
//! bytes visible to observers.
//!
//! # Architecture
//!
//! ```text
//! VspcServer
//!     ↓ accept
//! ConnectionWorker → VmConnection
//!     ↓ VC-UUID / VMOTION-*
//! SessionManager → Session → Subscribers
//! ```
//!
//! Each inbound connection gets a [`ConnectionWorker`] that owns the read
//! half and the Telnet codec. Once the VM identifies itself with a
//! `VC-UUID` subnegotiation the connection is bound to its [`Session`],
//! the logical identity that survives reconnects and migrations. The
//! [`SessionManager`] arbitrates the migration rendezvous between a
//! source's `VMOTION-BEGIN` and a destination's `VMOTION-PEER`.
//!
//! # Example
//!
//! ```no_run
//! use vspc_service::{VspcConfig, VspcServer, VspcHandler};
//! use std::sync::Arc;
//!
//! struct Hooks;
//! impl VspcHandler for Hooks {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VspcConfig::default();
//!     let server = VspcServer::new(config).await?;
//!     server.start(Arc::new(Hooks)).await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod config;
mod connection;
mod error;
mod handler;
mod manager;
mod observer;
mod scrollback;
mod server;
mod session;
mod types;
mod worker;

pub use config::VspcConfig;
pub use connection::VmConnection;
pub use error::{Result, VspcError};
pub use handler::VspcHandler;
pub use manager::SessionManager;
pub use observer::{Subscriber, SubscriberRx};
pub use scrollback::ScrollbackRing;
pub use server::VspcServer;
pub use session::Session;
pub use types::{ConnectionId, MigrationState, ServerSnapshot, SessionSnapshot};
pub use worker::ConnectionWorker;
