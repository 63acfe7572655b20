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

//! Telnet protocol constants (RFC 854) and the VMware serial-port extension
//! subopcode values.

/// Carriage Return
pub const CR: u8 = 0x0D;
/// Line Feed
pub const LF: u8 = 0x0A;

/// End of subnegotiation parameters
pub const SE: u8 = 240;
/// No operation
pub const NOP: u8 = 241;
/// The data stream portion of a Synch
pub const DM: u8 = 242;
/// NVT character BRK
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
pub const GA: u8 = 249;
/// Begin subnegotiation of the indicated option
pub const SB: u8 = 250;
/// Will perform the indicated option
pub const WILL: u8 = 251;
/// Will not perform the indicated option
pub const WONT: u8 = 252;
/// Request the other party perform the indicated option
pub const DO: u8 = 253;
/// Demand the other party stop performing the indicated option
pub const DONT: u8 = 254;
/// Interpret As Command
pub const IAC: u8 = 255;

/// Telnet option codes negotiated by the concentrator.
pub mod option {
    /// Binary Transmission [RFC856](https://tools.ietf.org/html/rfc856)
    pub const BINARY: u8 = 0;
    /// Echo [RFC857](https://tools.ietf.org/html/rfc857)
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead [RFC858](https://tools.ietf.org/html/rfc858)
    pub const SGA: u8 = 3;
    /// Authentication [RFC2941](https://tools.ietf.org/html/rfc2941)
    /// Advertised only; contents are passed through opaque.
    pub const AUTHENTICATION: u8 = 37;
    /// VMware VM-serial extension (vendor assigned)
    pub const VMWARE_EXT: u8 = 232;

    /// Per-option support flags, indexed by option code: `(local, remote)`.
    /// `local` is whether we are willing to perform the option ourselves,
    /// `remote` whether we are willing to have the peer perform it.
    pub const SUPPORT: [(bool, bool); 256] = {
        let mut table = [(false, false); 256];
        table[BINARY as usize] = (true, true);
        table[ECHO as usize] = (true, false);
        table[SGA as usize] = (true, true);
        table[AUTHENTICATION as usize] = (false, true);
        table[VMWARE_EXT as usize] = (true, true);
        table
    };
}

/// Subopcodes of the VMware serial-port extension. Values are fixed by the
/// published VMware specification.
pub mod vmware {
    /// Peer lists the suboptions it knows
    pub const KNOWN_SUBOPTIONS_1: u8 = 0;
    /// Answer listing the suboptions we know
    pub const KNOWN_SUBOPTIONS_2: u8 = 1;
    /// Peer reports an unknown suboption it received from us
    pub const UNKNOWN_SUBOPTION_RCVD_1: u8 = 2;
    /// We report an unknown suboption received from the peer
    pub const UNKNOWN_SUBOPTION_RCVD_2: u8 = 3;
    /// Source host announces an imminent migration
    pub const VMOTION_BEGIN: u8 = 40;
    /// We allow the migration: body carries `id || secret`
    pub const VMOTION_GOAHEAD: u8 = 41;
    /// We refuse the migration for now
    pub const VMOTION_NOTNOW: u8 = 43;
    /// Destination host claims the peer slot with `id || secret`
    pub const VMOTION_PEER: u8 = 44;
    /// We accept the destination as migration peer
    pub const VMOTION_PEER_OK: u8 = 45;
    /// Destination commits the handoff
    pub const VMOTION_COMPLETE: u8 = 46;
    /// Source abandons the migration
    pub const VMOTION_ABORT: u8 = 48;
    /// Peer asks us to proxy to a service URI
    pub const DO_PROXY: u8 = 70;
    /// We accept the proxy request
    pub const WILL_PROXY: u8 = 71;
    /// We refuse the proxy request
    pub const WONT_PROXY: u8 = 73;
    /// vCenter UUID of the VM on this connection
    pub const VM_VC_UUID: u8 = 80;
    /// Request the VM's vCenter UUID
    pub const GET_VM_VC_UUID: u8 = 81;
    /// Display name of the VM
    pub const VM_NAME: u8 = 82;
    /// Request the VM's display name
    pub const GET_VM_NAME: u8 = 83;
    /// BIOS UUID of the VM
    pub const VM_BIOS_UUID: u8 = 84;
    /// Request the VM's BIOS UUID
    pub const GET_VM_BIOS_UUID: u8 = 85;
    /// Location UUID of the VM
    pub const VM_LOCATION_UUID: u8 = 86;
    /// Request the VM's location UUID
    pub const GET_VM_LOCATION_UUID: u8 = 87;

    /// The suboptions this implementation handles, advertised in answer to
    /// `KNOWN_SUBOPTIONS_1`.
    pub const KNOWN: &[u8] = &[
        KNOWN_SUBOPTIONS_1,
        KNOWN_SUBOPTIONS_2,
        UNKNOWN_SUBOPTION_RCVD_1,
        UNKNOWN_SUBOPTION_RCVD_2,
        VMOTION_BEGIN,
        VMOTION_GOAHEAD,
        VMOTION_NOTNOW,
        VMOTION_PEER,
        VMOTION_PEER_OK,
        VMOTION_COMPLETE,
        VMOTION_ABORT,
        DO_PROXY,
        WILL_PROXY,
        WONT_PROXY,
        VM_VC_UUID,
        VM_NAME,
        VM_BIOS_UUID,
        VM_LOCATION_UUID,
    ];
}
