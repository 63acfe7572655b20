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
use std::fmt::Formatter;

///
/// `TelnetFrame` is the wire-level vocabulary: everything that can be encoded
/// onto (or was literally present on) the Telnet stream, including the
/// DO/DONT/WILL/WONT sidechannel frames that the decoder consumes internally.
///
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetFrame {
    /// A single data byte (IAC is escaped on encode)
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
    /// Request the peer perform an option
    Do(TelnetOption),
    /// Demand the peer stop performing an option
    Dont(TelnetOption),
    /// Offer to perform an option
    Will(TelnetOption),
    /// Refuse to perform an option
    Wont(TelnetOption),
    /// Subnegotiation payload
    Subnegotiate(TelnetArgument),
}

impl std::fmt::Display for TelnetFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetFrame::Data(byte) => write!(f, "Data(0x{byte:02X})"),
            TelnetFrame::NoOperation => write!(f, "NoOperation"),
            TelnetFrame::DataMark => write!(f, "DataMark"),
            TelnetFrame::Break => write!(f, "Break"),
            TelnetFrame::InterruptProcess => write!(f, "InterruptProcess"),
            TelnetFrame::AbortOutput => write!(f, "AbortOutput"),
            TelnetFrame::AreYouThere => write!(f, "AreYouThere"),
            TelnetFrame::EraseCharacter => write!(f, "EraseCharacter"),
            TelnetFrame::EraseLine => write!(f, "EraseLine"),
            TelnetFrame::GoAhead => write!(f, "GoAhead"),
            TelnetFrame::Do(option) => write!(f, "Do({option})"),
            TelnetFrame::Dont(option) => write!(f, "Dont({option})"),
            TelnetFrame::Will(option) => write!(f, "Will({option})"),
            TelnetFrame::Wont(option) => write!(f, "Wont({option})"),
            TelnetFrame::Subnegotiate(argument) => write!(f, "Subnegotiate({argument})"),
        }
    }
}
