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

//! # vSPC Telnet Protocol Codec
//!
//! This crate provides the Telnet wire codec used by the virtual serial port
//! concentrator, designed around `tokio_util::codec` for use with async
//! transports.
//!
//! ## Overview
//!
//! Hypervisors expose a VM's virtual serial port as a Telnet connection
//! (RFC 854) carrying a vendor extension option. This codec handles:
//!
//! - **Data transmission**: raw serial bytes with IAC (Interpret As Command)
//!   escaping
//! - **Option negotiation**: DO/DONT/WILL/WONT driven through the RFC 1143
//!   Q-method state machine, with replies queued on the codec
//! - **Subnegotiation**: `IAC SB ... IAC SE` framing, restartable at any
//!   byte boundary
//! - **The VMware serial-port extension**: VM identity, metadata, proxy
//!   negotiation, and the vMotion rendezvous subopcodes
//!
//! ## Core components
//!
//! [`TelnetCodec`] implements [`Decoder`](tokio_util::codec::Decoder) and
//! [`Encoder`](tokio_util::codec::Encoder). Decoding yields [`TelnetEvent`]s:
//! data bytes, completed negotiations ([`TelnetEvent::OptionStatus`]), and
//! parsed subnegotiations ([`TelnetArgument`]). Encoding consumes
//! [`TelnetFrame`]s, the wire-level vocabulary.
//!
//! Negotiation state lives in [`TelnetOptions`]; the decoder feeds received
//! DO/DONT/WILL/WONT through it and queues any required replies, which the
//! connection owner drains with [`TelnetCodec::take_pending_responses`].
//!
//! ## Error handling
//!
//! Malformed subnegotiation framing (a stray `IAC` inside a payload, or an
//! oversized payload) is a hard [`CodecError`]: the concentrator closes the
//! transport rather than resynchronize on a corrupt serial stream. Unknown
//! top-level commands decode to `NoOperation` with a warning.

#![warn(
    clippy::cargo,
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

mod args;
mod codec;
pub mod consts;
mod event;
mod frame;
mod options;
mod result;

pub use self::args::vmware;
pub use self::args::vmware::VmwareArgument;
pub use self::args::TelnetArgument;
pub use self::codec::TelnetCodec;
pub use self::consts as telnet;
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::options::{TelnetOption, TelnetOptions, TelnetSide};
pub use self::result::{CodecError, CodecResult, SubnegotiationErrorKind};
