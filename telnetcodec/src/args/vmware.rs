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

//! The VMware VM-serial extension subnegotiation vocabulary.
//!
//! Payload layout is `subopcode (1 byte) || body`. Migration tokens on the
//! wire are `id || secret` where the secret is the trailing 8 bytes,
//! big-endian; the id itself is opaque bytes chosen by the source host.

use crate::consts::vmware;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use bytes::BytesMut;
use std::fmt::Formatter;

/// Length of the migration secret suffix in a `GOAHEAD`/`PEER` body.
pub const SECRET_LEN: usize = 8;

/// A parsed VMware serial-port extension subnegotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmwareArgument {
    /// Peer lists the suboptions it knows
    KnownSuboptions1(BytesMut),
    /// Answer listing the suboptions we know
    KnownSuboptions2(BytesMut),
    /// Peer reports an unknown suboption it received from us
    UnknownSuboptionRcvd1(u8),
    /// We report an unknown suboption received from the peer
    UnknownSuboptionRcvd2(u8),
    /// vCenter UUID of the VM on this connection; binds it to a session
    VcUuid(String),
    /// Request the VM's vCenter UUID
    GetVcUuid,
    /// Display name of the VM
    VmName(String),
    /// Request the VM's display name
    GetVmName,
    /// BIOS UUID of the VM
    VmBiosUuid(String),
    /// Location UUID of the VM
    VmLocationUuid(String),
    /// Peer asks us to proxy: direction byte plus a service URI
    DoProxy {
        /// `b'C'` client or `b'S'` server
        direction: u8,
        /// Service URI to proxy to
        uri: String,
    },
    /// We accept the proxy request
    WillProxy,
    /// We refuse the proxy request
    WontProxy,
    /// Source host announces an imminent migration; body is the opaque id
    VMotionBegin(BytesMut),
    /// We allow the migration
    VMotionGoahead {
        /// Opaque migration id from the source
        id: BytesMut,
        /// Server-generated rendezvous secret
        secret: u64,
    },
    /// We refuse the migration for now
    VMotionNotNow(BytesMut),
    /// Destination host claims the peer slot
    VMotionPeer {
        /// Opaque migration id
        id: BytesMut,
        /// Secret presented by the destination
        secret: u64,
    },
    /// We accept the destination as migration peer
    VMotionPeerOk(BytesMut),
    /// Destination commits the handoff
    VMotionComplete(BytesMut),
    /// Source abandons the migration; the id is optional on the wire
    VMotionAbort(Option<BytesMut>),
    /// A subopcode this implementation does not recognize
    Unknown(u8, BytesMut),
}

/// A semantic parse failure inside a well-framed extension payload.
///
/// These never close the transport; the connection logs the failure and
/// carries on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmwareParseError {
    /// The payload had no subopcode byte.
    EmptyPayload,
    /// The body length does not fit the subopcode.
    BadLength {
        /// The subopcode whose body was malformed
        subopcode: u8,
        /// Observed body length
        length: usize,
    },
    /// The body was required to be UTF-8 text but was not.
    InvalidUtf8 {
        /// The subopcode whose body was malformed
        subopcode: u8,
    },
}

impl std::error::Error for VmwareParseError {}

impl std::fmt::Display for VmwareParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VmwareParseError::EmptyPayload => write!(f, "empty extension payload"),
            VmwareParseError::BadLength { subopcode, length } => {
                write!(f, "bad body length {length} for subopcode {subopcode}")
            }
            VmwareParseError::InvalidUtf8 { subopcode } => {
                write!(f, "non-UTF-8 body for subopcode {subopcode}")
            }
        }
    }
}

fn utf8(subopcode: u8, body: &[u8]) -> Result<String, VmwareParseError> {
    std::str::from_utf8(body)
        .map(str::to_owned)
        .map_err(|_| VmwareParseError::InvalidUtf8 { subopcode })
}

fn split_token(subopcode: u8, body: &[u8]) -> Result<(BytesMut, u64), VmwareParseError> {
    // id must be non-empty, so the token is at least SECRET_LEN + 1 bytes
    if body.len() <= SECRET_LEN {
        return Err(VmwareParseError::BadLength {
            subopcode,
            length: body.len(),
        });
    }
    let (id, secret) = body.split_at(body.len() - SECRET_LEN);
    Ok((BytesMut::from(id), BigEndian::read_u64(secret)))
}

impl VmwareArgument {
    /// Parses an unescaped subnegotiation payload into the vocabulary.
    pub fn parse(payload: &[u8]) -> Result<VmwareArgument, VmwareParseError> {
        let (&subopcode, body) = payload.split_first().ok_or(VmwareParseError::EmptyPayload)?;
        let argument = match subopcode {
            vmware::KNOWN_SUBOPTIONS_1 => VmwareArgument::KnownSuboptions1(BytesMut::from(body)),
            vmware::KNOWN_SUBOPTIONS_2 => VmwareArgument::KnownSuboptions2(BytesMut::from(body)),
            vmware::UNKNOWN_SUBOPTION_RCVD_1 => match body {
                [unknown] => VmwareArgument::UnknownSuboptionRcvd1(*unknown),
                _ => {
                    return Err(VmwareParseError::BadLength {
                        subopcode,
                        length: body.len(),
                    });
                }
            },
            vmware::UNKNOWN_SUBOPTION_RCVD_2 => match body {
                [unknown] => VmwareArgument::UnknownSuboptionRcvd2(*unknown),
                _ => {
                    return Err(VmwareParseError::BadLength {
                        subopcode,
                        length: body.len(),
                    });
                }
            },
            vmware::VM_VC_UUID => VmwareArgument::VcUuid(utf8(subopcode, body)?),
            vmware::GET_VM_VC_UUID => VmwareArgument::GetVcUuid,
            vmware::VM_NAME => VmwareArgument::VmName(utf8(subopcode, body)?),
            vmware::GET_VM_NAME => VmwareArgument::GetVmName,
            vmware::VM_BIOS_UUID => VmwareArgument::VmBiosUuid(utf8(subopcode, body)?),
            vmware::VM_LOCATION_UUID => VmwareArgument::VmLocationUuid(utf8(subopcode, body)?),
            vmware::DO_PROXY => {
                let (&direction, uri) = body.split_first().ok_or(VmwareParseError::BadLength {
                    subopcode,
                    length: body.len(),
                })?;
                VmwareArgument::DoProxy {
                    direction,
                    uri: utf8(subopcode, uri)?,
                }
            }
            vmware::WILL_PROXY => VmwareArgument::WillProxy,
            vmware::WONT_PROXY => VmwareArgument::WontProxy,
            vmware::VMOTION_BEGIN => {
                if body.is_empty() {
                    return Err(VmwareParseError::BadLength {
                        subopcode,
                        length: 0,
                    });
                }
                VmwareArgument::VMotionBegin(BytesMut::from(body))
            }
            vmware::VMOTION_GOAHEAD => {
                let (id, secret) = split_token(subopcode, body)?;
                VmwareArgument::VMotionGoahead { id, secret }
            }
            vmware::VMOTION_NOTNOW => VmwareArgument::VMotionNotNow(BytesMut::from(body)),
            vmware::VMOTION_PEER => {
                let (id, secret) = split_token(subopcode, body)?;
                VmwareArgument::VMotionPeer { id, secret }
            }
            vmware::VMOTION_PEER_OK => VmwareArgument::VMotionPeerOk(BytesMut::from(body)),
            vmware::VMOTION_COMPLETE => {
                if body.is_empty() {
                    return Err(VmwareParseError::BadLength {
                        subopcode,
                        length: 0,
                    });
                }
                VmwareArgument::VMotionComplete(BytesMut::from(body))
            }
            vmware::VMOTION_ABORT => {
                // Observed both bare and id-carrying forms in the field
                if body.is_empty() {
                    VmwareArgument::VMotionAbort(None)
                } else {
                    VmwareArgument::VMotionAbort(Some(BytesMut::from(body)))
                }
            }
            subopcode => VmwareArgument::Unknown(subopcode, BytesMut::from(body)),
        };
        Ok(argument)
    }

    /// The wire subopcode of this argument.
    pub fn subopcode(&self) -> u8 {
        match self {
            VmwareArgument::KnownSuboptions1(_) => vmware::KNOWN_SUBOPTIONS_1,
            VmwareArgument::KnownSuboptions2(_) => vmware::KNOWN_SUBOPTIONS_2,
            VmwareArgument::UnknownSuboptionRcvd1(_) => vmware::UNKNOWN_SUBOPTION_RCVD_1,
            VmwareArgument::UnknownSuboptionRcvd2(_) => vmware::UNKNOWN_SUBOPTION_RCVD_2,
            VmwareArgument::VcUuid(_) => vmware::VM_VC_UUID,
            VmwareArgument::GetVcUuid => vmware::GET_VM_VC_UUID,
            VmwareArgument::VmName(_) => vmware::VM_NAME,
            VmwareArgument::GetVmName => vmware::GET_VM_NAME,
            VmwareArgument::VmBiosUuid(_) => vmware::VM_BIOS_UUID,
            VmwareArgument::VmLocationUuid(_) => vmware::VM_LOCATION_UUID,
            VmwareArgument::DoProxy { .. } => vmware::DO_PROXY,
            VmwareArgument::WillProxy => vmware::WILL_PROXY,
            VmwareArgument::WontProxy => vmware::WONT_PROXY,
            VmwareArgument::VMotionBegin(_) => vmware::VMOTION_BEGIN,
            VmwareArgument::VMotionGoahead { .. } => vmware::VMOTION_GOAHEAD,
            VmwareArgument::VMotionNotNow(_) => vmware::VMOTION_NOTNOW,
            VmwareArgument::VMotionPeer { .. } => vmware::VMOTION_PEER,
            VmwareArgument::VMotionPeerOk(_) => vmware::VMOTION_PEER_OK,
            VmwareArgument::VMotionComplete(_) => vmware::VMOTION_COMPLETE,
            VmwareArgument::VMotionAbort(_) => vmware::VMOTION_ABORT,
            VmwareArgument::Unknown(subopcode, _) => *subopcode,
        }
    }

    /// Encoded length: subopcode byte plus body, before IAC escaping.
    pub fn len(&self) -> usize {
        1 + match self {
            VmwareArgument::KnownSuboptions1(body) | VmwareArgument::KnownSuboptions2(body) => {
                body.len()
            }
            VmwareArgument::UnknownSuboptionRcvd1(_) | VmwareArgument::UnknownSuboptionRcvd2(_) => 1,
            VmwareArgument::VcUuid(text)
            | VmwareArgument::VmName(text)
            | VmwareArgument::VmBiosUuid(text)
            | VmwareArgument::VmLocationUuid(text) => text.len(),
            VmwareArgument::GetVcUuid
            | VmwareArgument::GetVmName
            | VmwareArgument::WillProxy
            | VmwareArgument::WontProxy => 0,
            VmwareArgument::DoProxy { uri, .. } => 1 + uri.len(),
            VmwareArgument::VMotionBegin(id)
            | VmwareArgument::VMotionNotNow(id)
            | VmwareArgument::VMotionPeerOk(id)
            | VmwareArgument::VMotionComplete(id) => id.len(),
            VmwareArgument::VMotionGoahead { id, .. } | VmwareArgument::VMotionPeer { id, .. } => {
                id.len() + SECRET_LEN
            }
            VmwareArgument::VMotionAbort(id) => id.as_ref().map_or(0, BytesMut::len),
            VmwareArgument::Unknown(_, body) => body.len(),
        }
    }

    /// Whether the encoded payload is a bare subopcode.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    /// Writes `subopcode || body` to `writer`; IAC escaping is applied
    /// later by the frame encoder.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        writer.write_u8(self.subopcode())?;
        match self {
            VmwareArgument::KnownSuboptions1(body)
            | VmwareArgument::KnownSuboptions2(body)
            | VmwareArgument::Unknown(_, body) => writer.write_all(body)?,
            VmwareArgument::UnknownSuboptionRcvd1(unknown)
            | VmwareArgument::UnknownSuboptionRcvd2(unknown) => writer.write_u8(*unknown)?,
            VmwareArgument::VcUuid(text)
            | VmwareArgument::VmName(text)
            | VmwareArgument::VmBiosUuid(text)
            | VmwareArgument::VmLocationUuid(text) => writer.write_all(text.as_bytes())?,
            VmwareArgument::GetVcUuid
            | VmwareArgument::GetVmName
            | VmwareArgument::WillProxy
            | VmwareArgument::WontProxy => {}
            VmwareArgument::DoProxy { direction, uri } => {
                writer.write_u8(*direction)?;
                writer.write_all(uri.as_bytes())?;
            }
            VmwareArgument::VMotionBegin(id)
            | VmwareArgument::VMotionNotNow(id)
            | VmwareArgument::VMotionPeerOk(id)
            | VmwareArgument::VMotionComplete(id) => writer.write_all(id)?,
            VmwareArgument::VMotionGoahead { id, secret }
            | VmwareArgument::VMotionPeer { id, secret } => {
                writer.write_all(id)?;
                writer.write_u64::<BigEndian>(*secret)?;
            }
            VmwareArgument::VMotionAbort(id) => {
                if let Some(id) = id {
                    writer.write_all(id)?;
                }
            }
        }
        Ok(self.len())
    }
}

impl std::fmt::Display for VmwareArgument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VmwareArgument::KnownSuboptions1(body) => write!(f, "KnownSuboptions1({body:?})"),
            VmwareArgument::KnownSuboptions2(body) => write!(f, "KnownSuboptions2({body:?})"),
            VmwareArgument::UnknownSuboptionRcvd1(u) => write!(f, "UnknownSuboptionRcvd1({u})"),
            VmwareArgument::UnknownSuboptionRcvd2(u) => write!(f, "UnknownSuboptionRcvd2({u})"),
            VmwareArgument::VcUuid(uuid) => write!(f, "VcUuid({uuid})"),
            VmwareArgument::GetVcUuid => write!(f, "GetVcUuid"),
            VmwareArgument::VmName(name) => write!(f, "VmName({name})"),
            VmwareArgument::GetVmName => write!(f, "GetVmName"),
            VmwareArgument::VmBiosUuid(uuid) => write!(f, "VmBiosUuid({uuid})"),
            VmwareArgument::VmLocationUuid(uuid) => write!(f, "VmLocationUuid({uuid})"),
            VmwareArgument::DoProxy { direction, uri } => {
                write!(f, "DoProxy({}, {uri})", *direction as char)
            }
            VmwareArgument::WillProxy => write!(f, "WillProxy"),
            VmwareArgument::WontProxy => write!(f, "WontProxy"),
            VmwareArgument::VMotionBegin(id) => write!(f, "VMotionBegin({id:?})"),
            VmwareArgument::VMotionGoahead { id, .. } => write!(f, "VMotionGoahead({id:?})"),
            VmwareArgument::VMotionNotNow(id) => write!(f, "VMotionNotNow({id:?})"),
            VmwareArgument::VMotionPeer { id, .. } => write!(f, "VMotionPeer({id:?})"),
            VmwareArgument::VMotionPeerOk(id) => write!(f, "VMotionPeerOk({id:?})"),
            VmwareArgument::VMotionComplete(id) => write!(f, "VMotionComplete({id:?})"),
            VmwareArgument::VMotionAbort(id) => write!(f, "VMotionAbort({id:?})"),
            VmwareArgument::Unknown(subopcode, body) => {
                write!(f, "Unknown({subopcode}, {body:?})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(argument: VmwareArgument) {
        let mut encoded = Vec::new();
        let written = argument.write(&mut encoded).expect("write ok");
        assert_eq!(written, argument.len());
        assert_eq!(written, encoded.len());
        let parsed = VmwareArgument::parse(&encoded).expect("parse ok");
        assert_eq!(parsed, argument);
    }

    #[test]
    fn parse_vc_uuid() {
        let payload = [&[vmware::VM_VC_UUID][..], &b"abc-123"[..]].concat();
        let parsed = VmwareArgument::parse(&payload).unwrap();
        assert_eq!(parsed, VmwareArgument::VcUuid("abc-123".into()));
    }

    #[test]
    fn parse_vc_uuid_rejects_invalid_utf8() {
        let payload = [vmware::VM_VC_UUID, 0xC0, 0x00];
        assert_eq!(
            VmwareArgument::parse(&payload),
            Err(VmwareParseError::InvalidUtf8 {
                subopcode: vmware::VM_VC_UUID
            })
        );
    }

    #[test]
    fn parse_empty_payload_is_error() {
        assert_eq!(
            VmwareArgument::parse(&[]),
            Err(VmwareParseError::EmptyPayload)
        );
    }

    #[test]
    fn parse_peer_splits_trailing_secret() {
        let mut payload = vec![vmware::VMOTION_PEER];
        payload.extend_from_slice(b"mig-7");
        payload.extend_from_slice(&0x0123_4567_89AB_CDEFu64.to_be_bytes());
        let parsed = VmwareArgument::parse(&payload).unwrap();
        assert_eq!(
            parsed,
            VmwareArgument::VMotionPeer {
                id: BytesMut::from(&b"mig-7"[..]),
                secret: 0x0123_4567_89AB_CDEF,
            }
        );
    }

    #[test]
    fn parse_peer_too_short_is_error() {
        // 8 bytes total: no room for a non-empty id before the secret
        let payload = [vmware::VMOTION_PEER, 1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(
            VmwareArgument::parse(&payload),
            Err(VmwareParseError::BadLength {
                subopcode: vmware::VMOTION_PEER,
                length: 8,
            })
        );
    }

    #[test]
    fn parse_abort_accepts_both_forms() {
        let bare = VmwareArgument::parse(&[vmware::VMOTION_ABORT]).unwrap();
        assert_eq!(bare, VmwareArgument::VMotionAbort(None));

        let with_id = VmwareArgument::parse(&[vmware::VMOTION_ABORT, b'x']).unwrap();
        assert_eq!(
            with_id,
            VmwareArgument::VMotionAbort(Some(BytesMut::from(&b"x"[..])))
        );
    }

    #[test]
    fn parse_unknown_subopcode_is_surfaced_not_error() {
        let parsed = VmwareArgument::parse(&[0x63, 0x01, 0x02]).unwrap();
        assert_eq!(
            parsed,
            VmwareArgument::Unknown(0x63, BytesMut::from(&[0x01, 0x02][..]))
        );
    }

    #[test]
    fn parse_do_proxy() {
        let payload = [&[vmware::DO_PROXY, b'S'][..], &b"telnet://host:13370"[..]].concat();
        let parsed = VmwareArgument::parse(&payload).unwrap();
        assert_eq!(
            parsed,
            VmwareArgument::DoProxy {
                direction: b'S',
                uri: "telnet://host:13370".into(),
            }
        );
    }

    #[test]
    fn parse_begin_requires_id() {
        assert_eq!(
            VmwareArgument::parse(&[vmware::VMOTION_BEGIN]),
            Err(VmwareParseError::BadLength {
                subopcode: vmware::VMOTION_BEGIN,
                length: 0,
            })
        );
    }

    #[test]
    fn write_parse_roundtrips() {
        roundtrip(VmwareArgument::KnownSuboptions2(BytesMut::from(
            vmware::KNOWN,
        )));
        roundtrip(VmwareArgument::UnknownSuboptionRcvd2(0x63));
        roundtrip(VmwareArgument::VcUuid("52 a7 e1-ff".into()));
        roundtrip(VmwareArgument::VmName("build-host".into()));
        roundtrip(VmwareArgument::VMotionBegin(BytesMut::from(&b"id-1"[..])));
        roundtrip(VmwareArgument::VMotionGoahead {
            id: BytesMut::from(&b"id-1"[..]),
            secret: u64::MAX,
        });
        roundtrip(VmwareArgument::VMotionPeerOk(BytesMut::from(&b"id-1"[..])));
        roundtrip(VmwareArgument::VMotionAbort(None));
        roundtrip(VmwareArgument::WillProxy);
    }
}
