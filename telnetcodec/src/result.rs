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

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced by the Telnet codec.
///
/// A `Subnegotiation` error with a framing kind means the wire is corrupt
/// and the owning connection must be closed; semantic problems inside a
/// well-framed payload are surfaced differently (see
/// [`VmwareArgument::parse`](crate::VmwareArgument::parse)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// An I/O error occurred on the underlying stream.
    Io {
        /// The kind of I/O error that occurred
        kind: std::io::ErrorKind,
        /// Description of the operation that failed
        operation: String,
    },

    /// An invalid frame was fed through the negotiation engine.
    Negotiation {
        /// Description of what went wrong
        reason: String,
        /// The frame type that caused the error, if available
        frame_type: Option<String>,
    },

    /// Subnegotiation framing was violated.
    Subnegotiation {
        /// The option being subnegotiated, if known
        option: Option<u8>,
        /// Specific reason for the failure
        reason: SubnegotiationErrorKind,
    },
}

/// Specific kinds of subnegotiation framing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubnegotiationErrorKind {
    /// An IAC inside the payload was followed by something other than
    /// IAC or SE.
    InvalidEscape {
        /// The byte that followed the IAC
        command: u8,
    },

    /// The payload exceeded the maximum accepted length.
    Overlong {
        /// Number of bytes accumulated
        length: usize,
        /// Maximum accepted payload length
        limit: usize,
    },
}

impl std::error::Error for CodecError {}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Io { kind, operation } => {
                write!(f, "I/O error during {operation}: {kind:?}")
            }
            CodecError::Negotiation { reason, frame_type } => {
                if let Some(ft) = frame_type {
                    write!(f, "Negotiation error ({ft}): {reason}")
                } else {
                    write!(f, "Negotiation error: {reason}")
                }
            }
            CodecError::Subnegotiation { option, reason } => {
                if let Some(opt) = option {
                    write!(f, "Subnegotiation error for option {opt}: {reason}")
                } else {
                    write!(f, "Subnegotiation error: {reason}")
                }
            }
        }
    }
}

impl std::fmt::Display for SubnegotiationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnegotiationErrorKind::InvalidEscape { command } => {
                write!(f, "IAC followed by 0x{command:02X} inside payload")
            }
            SubnegotiationErrorKind::Overlong { length, limit } => {
                write!(f, "payload of {length} bytes exceeds limit of {limit}")
            }
        }
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Io {
            kind: err.kind(),
            operation: err.to_string(),
        }
    }
}
