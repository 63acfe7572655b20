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

use crate::TelnetOption;
use crate::args::vmware::VmwareArgument;
use std::fmt::Formatter;
use bytes::BytesMut;

/// VMware serial-port extension argument parsing and handling
pub mod vmware;

///
/// Telnet Subnegotiation Argument
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetArgument {
    /// A parsed VMware serial-port extension subnegotiation.
    Vmware(VmwareArgument),
    /// A subnegotiation for any other option; the payload is carried
    /// opaque (Authentication passthrough lands here).
    Unknown(TelnetOption, BytesMut),
}

impl TelnetArgument {
    /// Returns the encoded byte length of this argument, before IAC
    /// escaping is applied by the frame encoder.
    pub fn len(&self) -> usize {
        match self {
            TelnetArgument::Vmware(inner) => inner.len(),
            TelnetArgument::Unknown(_option, inner) => inner.len(),
        }
    }

    /// Whether the encoded payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the raw (unescaped) payload bytes to `writer`.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        match self {
            TelnetArgument::Vmware(inner) => inner.write(writer),
            TelnetArgument::Unknown(_option, payload) => {
                writer.write_all(payload)?;
                Ok(payload.len())
            }
        }
    }

    /// Returns the `TelnetOption` this argument belongs to, used to route
    /// subnegotiation data to the owning handler.
    pub fn option(&self) -> TelnetOption {
        match self {
            TelnetArgument::Vmware(_) => TelnetOption::VmwareExt,
            TelnetArgument::Unknown(option, _) => *option,
        }
    }
}

impl std::fmt::Display for TelnetArgument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetArgument::Vmware(v) => write!(f, "{v}"),
            TelnetArgument::Unknown(o, v) => write!(f, "{o}-{v:?}"),
        }
    }
}
