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

use crate::{CodecError, CodecResult, TelnetFrame, consts};
use std::fmt::Formatter;

///
/// The Telnet options the concentrator negotiates. Everything else is
/// carried as [`TelnetOption::Unknown`] and refused during negotiation.
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetOption {
    /// Binary Transmission [RFC856](https://tools.ietf.org/html/rfc856)
    TransmitBinary,
    /// Echo [RFC857](https://tools.ietf.org/html/rfc857)
    Echo,
    /// Suppress Go Ahead [RFC858](https://tools.ietf.org/html/rfc858)
    SuppressGoAhead,
    /// Authentication [RFC2941](https://tools.ietf.org/html/rfc2941);
    /// advertised only, subnegotiation contents are passed through opaque
    Authentication,
    /// The VMware VM-serial extension carrying identity, metadata and the
    /// vMotion rendezvous subopcodes
    VmwareExt,
    /// Any other option
    Unknown(u8),
}

impl TelnetOption {
    /// The wire code for this option.
    pub fn to_u8(self) -> u8 {
        match self {
            TelnetOption::TransmitBinary => consts::option::BINARY,
            TelnetOption::Echo => consts::option::ECHO,
            TelnetOption::SuppressGoAhead => consts::option::SGA,
            TelnetOption::Authentication => consts::option::AUTHENTICATION,
            TelnetOption::VmwareExt => consts::option::VMWARE_EXT,
            TelnetOption::Unknown(byte) => byte,
        }
    }

    /// Maps a wire code onto the option vocabulary; unrecognized codes map
    /// to [`TelnetOption::Unknown`].
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            consts::option::BINARY => TelnetOption::TransmitBinary,
            consts::option::ECHO => TelnetOption::Echo,
            consts::option::SGA => TelnetOption::SuppressGoAhead,
            consts::option::AUTHENTICATION => TelnetOption::Authentication,
            consts::option::VMWARE_EXT => TelnetOption::VmwareExt,
            byte => TelnetOption::Unknown(byte),
        }
    }

    /// Whether we are willing to perform this option ourselves.
    pub fn supported_local(self) -> bool {
        consts::option::SUPPORT[self.to_u8() as usize].0
    }

    /// Whether we are willing to have the peer perform this option.
    pub fn supported_remote(self) -> bool {
        consts::option::SUPPORT[self.to_u8() as usize].1
    }
}

impl std::fmt::Display for TelnetOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetOption::TransmitBinary => write!(f, "TransmitBinary"),
            TelnetOption::Echo => write!(f, "Echo"),
            TelnetOption::SuppressGoAhead => write!(f, "SuppressGoAhead"),
            TelnetOption::Authentication => write!(f, "Authentication"),
            TelnetOption::VmwareExt => write!(f, "VmwareExt"),
            TelnetOption::Unknown(option) => write!(f, "Unknown({option})"),
        }
    }
}

impl From<u8> for TelnetOption {
    fn from(byte: u8) -> Self {
        Self::from_u8(byte)
    }
}

impl From<TelnetOption> for u8 {
    fn from(option: TelnetOption) -> Self {
        option.to_u8()
    }
}

/// Which end of the connection an option state refers to.
///
/// Each option maintains two independent RFC 1143 state machines: the local
/// path (whether *we* perform the option; negotiated with WILL/WONT,
/// answered by DO/DONT) and the remote path (whether the *peer* performs it;
/// negotiated with DO/DONT, answered by WILL/WONT).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetSide {
    /// The local side of the connection (what we perform)
    Local,
    /// The remote side of the connection (what the peer performs)
    Remote,
}

impl std::fmt::Display for TelnetSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetSide::Local => write!(f, "Local"),
            TelnetSide::Remote => write!(f, "Remote"),
        }
    }
}

/// RFC 1143 Q-method negotiation state for one (option, side) pair.
///
/// The `WantNoOpposite`/`WantYesOpposite` states queue a request issued
/// while the opposite request is still in flight; the queued request is
/// replayed when the pending ack arrives, so requests are never dropped.
#[derive(Copy, Clone, Debug, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub(crate) enum QState {
    /// Disabled
    #[default]
    No,
    /// Disable requested, awaiting ack
    WantNo,
    /// Disable in flight with a queued enable
    WantNoOpposite,
    /// Enabled
    Yes,
    /// Enable requested, awaiting ack
    WantYes,
    /// Enable in flight with a queued disable
    WantYesOpposite,
}

impl std::fmt::Display for QState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QState::No => write!(f, "No"),
            QState::WantNo => write!(f, "WantNo"),
            QState::WantNoOpposite => write!(f, "WantNoOpposite"),
            QState::Yes => write!(f, "Yes"),
            QState::WantYes => write!(f, "WantYes"),
            QState::WantYesOpposite => write!(f, "WantYesOpposite"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct OptionState {
    local: QState,
    remote: QState,
}

#[derive(Clone, Copy, Debug, Default)]
struct SupportState {
    local: bool,
    remote: bool,
}

/// Per-connection negotiation state for all 256 option codes.
///
/// The `config` table fixes which options we are willing to enable on each
/// side; the `state` table tracks the Q-method state of each. Requests for
/// unsupported options are refused with WONT/DONT and never change state,
/// and no acknowledgement is ever emitted for a state already held, so the
/// engine cannot enter an ack loop.
#[derive(Clone, Debug)]
pub struct TelnetOptions {
    config: [SupportState; 256],
    state: [OptionState; 256],
}

impl TelnetOptions {
    pub(crate) fn local_qstate(&self, option: TelnetOption) -> QState {
        self.state[option.to_u8() as usize].local
    }

    pub(crate) fn remote_qstate(&self, option: TelnetOption) -> QState {
        self.state[option.to_u8() as usize].remote
    }

    /// Whether the option is currently enabled on our side.
    pub fn local_enabled(&self, option: TelnetOption) -> bool {
        matches!(
            self.state[option.to_u8() as usize].local,
            QState::Yes | QState::WantNo | QState::WantNoOpposite
        )
    }

    /// Whether the option is currently enabled on the peer's side.
    pub fn remote_enabled(&self, option: TelnetOption) -> bool {
        matches!(
            self.state[option.to_u8() as usize].remote,
            QState::Yes | QState::WantNo | QState::WantNoOpposite
        )
    }

    /// Request to enable the option locally. Returns the WILL frame to send,
    /// or `None` when no traffic is needed (already enabled, queued behind a
    /// pending negotiation, or unsupported).
    pub fn enable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_will(option)
    }

    /// Request to disable the option locally.
    pub fn disable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_wont(option)
    }

    /// Request that the peer enable the option.
    pub fn enable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_do(option)
    }

    /// Request that the peer disable the option.
    pub fn disable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_dont(option)
    }

    /// Feed a received negotiation frame through the state machine.
    /// Returns the reply frame to transmit, if any.
    pub fn handle_received(&mut self, frame: TelnetFrame) -> CodecResult<Option<TelnetFrame>> {
        match frame {
            TelnetFrame::Do(option) => Ok(self.recv_do(option)),
            TelnetFrame::Dont(option) => Ok(self.recv_dont(option)),
            TelnetFrame::Will(option) => Ok(self.recv_will(option)),
            TelnetFrame::Wont(option) => Ok(self.recv_wont(option)),
            frame => Err(CodecError::Negotiation {
                reason: "not a negotiation frame".into(),
                frame_type: Some(format!("{frame:?}")),
            }),
        }
    }

    // #### Outgoing requests (what we initiate) ################################

    fn request_will(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !self.config[option.to_u8() as usize].local {
            return None;
        }
        let slot = &mut self.state[option.to_u8() as usize].local;
        match *slot {
            QState::No => {
                *slot = QState::WantYes;
                Some(TelnetFrame::Will(option))
            }
            // Queue behind the in-flight disable; replayed on its ack
            QState::WantNo => {
                *slot = QState::WantNoOpposite;
                None
            }
            QState::WantYesOpposite => {
                *slot = QState::WantYes;
                None
            }
            QState::Yes | QState::WantYes | QState::WantNoOpposite => None,
        }
    }

    fn request_wont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let slot = &mut self.state[option.to_u8() as usize].local;
        match *slot {
            QState::Yes => {
                *slot = QState::WantNo;
                Some(TelnetFrame::Wont(option))
            }
            QState::WantYes => {
                *slot = QState::WantYesOpposite;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::WantNo;
                None
            }
            QState::No | QState::WantNo | QState::WantYesOpposite => None,
        }
    }

    fn request_do(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !self.config[option.to_u8() as usize].remote {
            return None;
        }
        let slot = &mut self.state[option.to_u8() as usize].remote;
        match *slot {
            QState::No => {
                *slot = QState::WantYes;
                Some(TelnetFrame::Do(option))
            }
            QState::WantNo => {
                *slot = QState::WantNoOpposite;
                None
            }
            QState::WantYesOpposite => {
                *slot = QState::WantYes;
                None
            }
            QState::Yes | QState::WantYes | QState::WantNoOpposite => None,
        }
    }

    fn request_dont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let slot = &mut self.state[option.to_u8() as usize].remote;
        match *slot {
            QState::Yes => {
                *slot = QState::WantNo;
                Some(TelnetFrame::Dont(option))
            }
            QState::WantYes => {
                *slot = QState::WantYesOpposite;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::WantNo;
                None
            }
            QState::No | QState::WantNo | QState::WantYesOpposite => None,
        }
    }

    // #### Incoming processing (peer sent us DO/DONT/WILL/WONT) ################

    fn recv_will(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !self.config[option.to_u8() as usize].remote {
            return Some(TelnetFrame::Dont(option));
        }
        let slot = &mut self.state[option.to_u8() as usize].remote;
        match *slot {
            QState::No => {
                *slot = QState::Yes;
                Some(TelnetFrame::Do(option))
            }
            QState::Yes => None,
            // DONT answered by WILL; RFC 1143 settles on disabled
            QState::WantNo => {
                *slot = QState::No;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::Yes;
                None
            }
            QState::WantYes => {
                *slot = QState::Yes;
                None
            }
            QState::WantYesOpposite => {
                *slot = QState::WantNo;
                Some(TelnetFrame::Dont(option))
            }
        }
    }

    fn recv_wont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let slot = &mut self.state[option.to_u8() as usize].remote;
        match *slot {
            QState::No => None,
            QState::Yes => {
                *slot = QState::No;
                Some(TelnetFrame::Dont(option))
            }
            QState::WantNo => {
                *slot = QState::No;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::WantYes;
                Some(TelnetFrame::Do(option))
            }
            QState::WantYes | QState::WantYesOpposite => {
                *slot = QState::No;
                None
            }
        }
    }

    fn recv_do(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !self.config[option.to_u8() as usize].local {
            return Some(TelnetFrame::Wont(option));
        }
        let slot = &mut self.state[option.to_u8() as usize].local;
        match *slot {
            QState::No => {
                *slot = QState::Yes;
                Some(TelnetFrame::Will(option))
            }
            QState::Yes => None,
            // WONT answered by DO; RFC 1143 settles on disabled
            QState::WantNo => {
                *slot = QState::No;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::Yes;
                None
            }
            QState::WantYes => {
                *slot = QState::Yes;
                None
            }
            QState::WantYesOpposite => {
                *slot = QState::WantNo;
                Some(TelnetFrame::Wont(option))
            }
        }
    }

    fn recv_dont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let slot = &mut self.state[option.to_u8() as usize].local;
        match *slot {
            QState::No => None,
            QState::Yes => {
                *slot = QState::No;
                Some(TelnetFrame::Wont(option))
            }
            QState::WantNo => {
                *slot = QState::No;
                None
            }
            QState::WantNoOpposite => {
                *slot = QState::WantYes;
                Some(TelnetFrame::Will(option))
            }
            QState::WantYes | QState::WantYesOpposite => {
                *slot = QState::No;
                None
            }
        }
    }
}

impl Default for TelnetOptions {
    fn default() -> Self {
        TelnetOptions {
            config: core::array::from_fn(|idx| {
                let option = TelnetOption::from_u8(idx as u8);
                SupportState {
                    local: option.supported_local(),
                    remote: option.supported_remote(),
                }
            }),
            state: [OptionState::default(); 256],
        }
    }
}
