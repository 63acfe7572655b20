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

use super::TelnetOption;
use crate::args::TelnetArgument;
use crate::options::TelnetSide;

///
/// `TelnetEvent` represents user-facing events from the Telnet codec.
/// Unlike [`TelnetFrame`](crate::TelnetFrame), which includes the low-level
/// DO/DONT/WILL/WONT sidechannel frames, `TelnetEvent` surfaces completed
/// negotiations as `OptionStatus`; the raw negotiation traffic is consumed
/// by the codec's embedded Q-method engine.
///
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetEvent {
    /// Telnet data byte
    Data(u8),
    /// No Operation
    NoOperation,
    /// End of urgent data stream
    DataMark,
    /// Operator pressed the Break key
    Break,
    /// Interrupt current process
    InterruptProcess,
    /// Cancel output from the current process
    AbortOutput,
    /// Request acknowledgment
    AreYouThere,
    /// Erase the previous character
    EraseCharacter,
    /// Erase the previous line
    EraseLine,
    /// End of input for half-duplex connections
    GoAhead,
    /// A negotiation completed: (option, side, enabled)
    OptionStatus(TelnetOption, TelnetSide, bool),
    /// Subnegotiation payload
    Subnegotiate(TelnetArgument),
}
