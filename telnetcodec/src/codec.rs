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

use super::{CodecError, TelnetEvent, TelnetFrame, TelnetOption, consts};
use crate::args::TelnetArgument;
use crate::args::vmware::VmwareArgument;
use crate::options::{TelnetOptions, TelnetSide};
use crate::result::SubnegotiationErrorKind;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Maximum accepted subnegotiation payload. A hypervisor never sends
/// anything close to this; larger frames indicate a corrupt stream.
const MAX_SUBNEGOTIATION: usize = 8192;

/// A codec for the Telnet protocol as spoken by hypervisor serial ports.
///
/// `TelnetCodec` owns the decoder state machine, the subnegotiation
/// reassembly buffer, and the per-connection option negotiation state.
/// Received DO/DONT/WILL/WONT frames are processed internally through the
/// Q-method engine; any reply they require is queued and must be drained
/// with [`TelnetCodec::take_pending_responses`] after each decode batch.
///
/// Typically paired with a `tokio_util::codec` transport, or driven
/// manually against a read buffer.
pub struct TelnetCodec {
    decoder_buffer: BytesMut,
    decoder_state: DecoderState,
    options: TelnetOptions,
    pending_responses: Vec<TelnetFrame>,
}

impl TelnetCodec {
    /// Creates a new codec with all options disabled.
    pub fn new() -> TelnetCodec {
        TelnetCodec::default()
    }

    /// Checks if a Telnet option is currently enabled on our side.
    pub fn is_enabled_local(&self, option: TelnetOption) -> bool {
        self.options.local_enabled(option)
    }

    /// Checks if a Telnet option is currently enabled on the peer's side.
    pub fn is_enabled_remote(&self, option: TelnetOption) -> bool {
        self.options.remote_enabled(option)
    }

    /// Request to enable an option locally (we will send WILL).
    ///
    /// Arms the Q-method state machine; returns the frame to transmit, or
    /// `None` when no traffic is needed.
    pub fn enable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.options.enable_local(option)
    }

    /// Request to disable an option locally (we will send WONT).
    pub fn disable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.options.disable_local(option)
    }

    /// Request the peer enable an option (we will send DO).
    pub fn enable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.options.enable_remote(option)
    }

    /// Request the peer disable an option (we will send DONT).
    pub fn disable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.options.disable_remote(option)
    }

    /// Whether decoding has queued negotiation replies to transmit.
    pub fn has_pending_responses(&self) -> bool {
        !self.pending_responses.is_empty()
    }

    /// Drains the negotiation replies queued during decoding. The owner
    /// must transmit these after every decode batch.
    pub fn take_pending_responses(&mut self) -> Vec<TelnetFrame> {
        std::mem::take(&mut self.pending_responses)
    }

    /// Feeds a received negotiation frame through the Q-method engine,
    /// queueing the reply and reporting any completed transition.
    fn negotiate(
        &mut self,
        frame: TelnetFrame,
        option: TelnetOption,
        side: TelnetSide,
    ) -> Result<Option<TelnetEvent>, CodecError> {
        let enabled_before = match side {
            TelnetSide::Local => self.options.local_enabled(option),
            TelnetSide::Remote => self.options.remote_enabled(option),
        };
        if let Some(reply) = self.options.handle_received(frame)? {
            self.pending_responses.push(reply);
        }
        let enabled_after = match side {
            TelnetSide::Local => self.options.local_enabled(option),
            TelnetSide::Remote => self.options.remote_enabled(option),
        };
        if enabled_before != enabled_after {
            Ok(Some(TelnetEvent::OptionStatus(option, side, enabled_after)))
        } else {
            Ok(None)
        }
    }

    /// Completes a subnegotiation: parses the reassembled payload into a
    /// [`TelnetArgument`] according to the owning option.
    fn finish_subnegotiation(&mut self, option_code: u8) -> Option<TelnetEvent> {
        let option = TelnetOption::from_u8(option_code);
        let payload = BytesMut::from(self.decoder_buffer.as_ref());
        self.decoder_buffer.clear();
        let argument = match option {
            TelnetOption::VmwareExt => match VmwareArgument::parse(&payload) {
                Ok(argument) => TelnetArgument::Vmware(argument),
                Err(error) => {
                    // Semantic error in a well-framed payload: drop it,
                    // the connection carries on
                    warn!(%error, "discarding malformed extension subnegotiation");
                    return None;
                }
            },
            option => TelnetArgument::Unknown(option, payload),
        };
        Some(TelnetEvent::Subnegotiate(argument))
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        TelnetCodec {
            decoder_buffer: BytesMut::new(),
            decoder_state: DecoderState::NormalData,
            options: TelnetOptions::default(),
            pending_responses: Vec::new(),
        }
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = CodecError;

    /// Decodes one [`TelnetEvent`] from `src`, consuming as many bytes as
    /// needed. Returns `Ok(None)` when `src` is exhausted mid-frame; the
    /// partial frame stays buffered and decoding resumes on the next call,
    /// so frames may be split at arbitrary byte boundaries.
    ///
    /// Negotiation traffic never surfaces raw: DO/DONT/WILL/WONT run
    /// through the Q-method engine, replies are queued on the codec, and a
    /// completed transition is reported as [`TelnetEvent::OptionStatus`].
    ///
    /// # Errors
    ///
    /// A stray `IAC` inside a subnegotiation payload (not followed by `IAC`
    /// or `SE`) and an overlong payload are protocol errors; the caller is
    /// expected to close the transport.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetEvent>, Self::Error> {
        while src.remaining() > 0 {
            let byte = src.get_u8();
            match (self.decoder_state, byte) {
                (DecoderState::NormalData, consts::IAC) => {
                    self.decoder_state = DecoderState::InterpretAsCommand;
                }
                (DecoderState::NormalData, _) => {
                    return Ok(Some(TelnetEvent::Data(byte)));
                }
                (DecoderState::InterpretAsCommand, consts::IAC) => {
                    // Escaped 0xFF data byte
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::Data(consts::IAC)));
                }
                (DecoderState::InterpretAsCommand, consts::DO) => {
                    self.decoder_state = DecoderState::NegotiateDo;
                }
                (DecoderState::InterpretAsCommand, consts::DONT) => {
                    self.decoder_state = DecoderState::NegotiateDont;
                }
                (DecoderState::InterpretAsCommand, consts::WILL) => {
                    self.decoder_state = DecoderState::NegotiateWill;
                }
                (DecoderState::InterpretAsCommand, consts::WONT) => {
                    self.decoder_state = DecoderState::NegotiateWont;
                }
                (DecoderState::InterpretAsCommand, consts::SB) => {
                    self.decoder_state = DecoderState::Subnegotiate;
                }
                (DecoderState::InterpretAsCommand, byte) => {
                    self.decoder_state = DecoderState::NormalData;
                    return match command_event(byte) {
                        Some(event) => Ok(Some(event)),
                        None => {
                            warn!("received unknown command 0x{:02X}", byte);
                            Ok(Some(TelnetEvent::NoOperation))
                        }
                    };
                }
                (DecoderState::NegotiateDo, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Do(option), option, TelnetSide::Local)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateDont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Dont(option), option, TelnetSide::Local)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWill, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Will(option), option, TelnetSide::Remote)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Wont(option), option, TelnetSide::Remote)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::Subnegotiate, _) => {
                    self.decoder_state = DecoderState::SubnegotiateArgument(byte);
                }
                (DecoderState::SubnegotiateArgument(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgumentIAC(option);
                }
                (DecoderState::SubnegotiateArgument(option), _) => {
                    if self.decoder_buffer.len() >= MAX_SUBNEGOTIATION {
                        self.decoder_state = DecoderState::NormalData;
                        self.decoder_buffer.clear();
                        return Err(CodecError::Subnegotiation {
                            option: Some(option),
                            reason: SubnegotiationErrorKind::Overlong {
                                length: MAX_SUBNEGOTIATION + 1,
                                limit: MAX_SUBNEGOTIATION,
                            },
                        });
                    }
                    self.decoder_buffer.put_u8(byte);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                    self.decoder_buffer.put_u8(consts::IAC);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    if let Some(event) = self.finish_subnegotiation(option) {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::SubnegotiateArgumentIAC(option), _) => {
                    // A bare IAC inside a payload means the stream framing
                    // is gone; resynchronizing would corrupt serial data
                    self.decoder_state = DecoderState::NormalData;
                    self.decoder_buffer.clear();
                    return Err(CodecError::Subnegotiation {
                        option: Some(option),
                        reason: SubnegotiationErrorKind::InvalidEscape { command: byte },
                    });
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<TelnetFrame> for TelnetCodec {
    type Error = CodecError;

    /// Encodes a [`TelnetFrame`] into `dst`.
    ///
    /// Data bytes equal to IAC are doubled. Subnegotiations are framed as
    /// `IAC SB option payload IAC SE`, with any IAC inside the payload
    /// doubled so the frame decodes back to itself.
    fn encode(&mut self, item: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            TelnetFrame::Data(ch) => {
                dst.reserve(2);
                if ch == consts::IAC {
                    dst.put_u8(consts::IAC);
                }
                dst.put_u8(ch);
            }
            TelnetFrame::NoOperation => put_command(dst, consts::NOP),
            TelnetFrame::DataMark => put_command(dst, consts::DM),
            TelnetFrame::Break => put_command(dst, consts::BRK),
            TelnetFrame::InterruptProcess => put_command(dst, consts::IP),
            TelnetFrame::AbortOutput => put_command(dst, consts::AO),
            TelnetFrame::AreYouThere => put_command(dst, consts::AYT),
            TelnetFrame::EraseCharacter => put_command(dst, consts::EC),
            TelnetFrame::EraseLine => put_command(dst, consts::EL),
            TelnetFrame::GoAhead => put_command(dst, consts::GA),
            TelnetFrame::Do(option) => put_negotiation(dst, consts::DO, option),
            TelnetFrame::Dont(option) => put_negotiation(dst, consts::DONT, option),
            TelnetFrame::Will(option) => put_negotiation(dst, consts::WILL, option),
            TelnetFrame::Wont(option) => put_negotiation(dst, consts::WONT, option),
            TelnetFrame::Subnegotiate(argument) => {
                let mut payload = Vec::with_capacity(argument.len());
                argument.write(&mut payload)?;
                dst.reserve(5 + payload.len());
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SB);
                dst.put_u8(argument.option().to_u8());
                for byte in payload {
                    if byte == consts::IAC {
                        dst.put_u8(consts::IAC);
                    }
                    dst.put_u8(byte);
                }
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SE);
            }
        }
        Ok(())
    }
}

impl Encoder<&[u8]> for TelnetCodec {
    type Error = CodecError;

    /// Encodes a run of raw data bytes, doubling any embedded IAC.
    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        for &byte in item {
            if byte == consts::IAC {
                dst.put_u8(consts::IAC);
            }
            dst.put_u8(byte);
        }
        Ok(())
    }
}

/// Maps a bare `IAC <command>` byte to its event.
fn command_event(byte: u8) -> Option<TelnetEvent> {
    Some(match byte {
        consts::NOP => TelnetEvent::NoOperation,
        consts::DM => TelnetEvent::DataMark,
        consts::BRK => TelnetEvent::Break,
        consts::IP => TelnetEvent::InterruptProcess,
        consts::AO => TelnetEvent::AbortOutput,
        consts::AYT => TelnetEvent::AreYouThere,
        consts::EC => TelnetEvent::EraseCharacter,
        consts::EL => TelnetEvent::EraseLine,
        consts::GA => TelnetEvent::GoAhead,
        _ => return None,
    })
}

/// Writes a bare `IAC <command>` pair.
fn put_command(dst: &mut BytesMut, command: u8) {
    dst.reserve(2);
    dst.put_u8(consts::IAC);
    dst.put_u8(command);
}

/// Writes an `IAC <verb> <option>` negotiation triple.
fn put_negotiation(dst: &mut BytesMut, verb: u8, option: TelnetOption) {
    dst.reserve(3);
    dst.put_u8(consts::IAC);
    dst.put_u8(verb);
    dst.put_u8(option.to_u8());
}

///
/// Internal state of the Telnet decoder, advanced one byte at a time.
///
#[derive(Clone, Copy, Debug)]
enum DecoderState {
    /// Normal data
    NormalData,
    /// Received IAC, next byte is a command
    InterpretAsCommand,
    /// Received DO, next byte is the option
    NegotiateDo,
    /// Received DONT, next byte is the option
    NegotiateDont,
    /// Received WILL, next byte is the option
    NegotiateWill,
    /// Received WONT, next byte is the option
    NegotiateWont,
    /// Received IAC SB, next byte is the option
    Subnegotiate,
    /// Accumulating subnegotiation payload for the given option
    SubnegotiateArgument(u8),
    /// Received IAC inside a subnegotiation payload
    SubnegotiateArgumentIAC(u8),
}
