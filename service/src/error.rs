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

//! Error types for the concentrator
//!
//! Errors local to a single connection never destroy a session; a session
//! only dies through idle-grace expiry in the manager's reaper.

use thiserror::Error;

/// Result type for concentrator operations
pub type Result<T> = std::result::Result<T, VspcError>;

/// Concentrator error types
#[derive(Debug, Error)]
pub enum VspcError {
    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error from the codec layer
    #[error("Protocol error: {0}")]
    Codec(#[from] vspc_telnetcodec::CodecError),

    /// No session is known for the given identity
    #[error("No session for {0}")]
    SessionNotFound(String),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Maximum number of connections reached
    #[error("Maximum connections ({0}) reached")]
    MaxConnectionsReached(usize),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl VspcError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors don't indicate a fatal condition; retrying the
    /// operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VspcError::Timeout | VspcError::ConnectionClosed | VspcError::Io(_)
        )
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, VspcError::ConnectionClosed | VspcError::Io(_))
    }

    /// Check if the error came from the protocol layer
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, VspcError::Codec(_))
    }
}
