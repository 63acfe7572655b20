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

//! Round-trip properties: every well-formed frame sequence survives
//! encode → decode unchanged, at any read-boundary split.

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};
use vspc_telnetcodec::{
    TelnetArgument, TelnetCodec, TelnetEvent, TelnetFrame, TelnetOption, VmwareArgument,
};

fn decode_all(codec: &mut TelnetCodec, src: &mut BytesMut) -> Vec<TelnetEvent> {
    let mut out = Vec::new();
    while let Some(event) = codec.decode(src).expect("well-formed input decodes") {
        out.push(event);
    }
    out
}

fn arb_vmware_argument() -> impl Strategy<Value = VmwareArgument> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 1..32)
            .prop_map(|id| VmwareArgument::VMotionBegin(BytesMut::from(&id[..]))),
        (proptest::collection::vec(any::<u8>(), 1..32), any::<u64>()).prop_map(|(id, secret)| {
            VmwareArgument::VMotionPeer {
                id: BytesMut::from(&id[..]),
                secret,
            }
        }),
        (proptest::collection::vec(any::<u8>(), 1..32), any::<u64>()).prop_map(|(id, secret)| {
            VmwareArgument::VMotionGoahead {
                id: BytesMut::from(&id[..]),
                secret,
            }
        }),
        "[a-zA-Z0-9-]{1,36}".prop_map(VmwareArgument::VcUuid),
        "[ -~]{0,24}".prop_map(VmwareArgument::VmName),
        Just(VmwareArgument::VMotionAbort(None)),
        Just(VmwareArgument::WillProxy),
    ]
}

fn arb_frame() -> impl Strategy<Value = TelnetFrame> {
    prop_oneof![
        8 => any::<u8>().prop_map(TelnetFrame::Data),
        1 => Just(TelnetFrame::Break),
        1 => Just(TelnetFrame::GoAhead),
        2 => arb_vmware_argument()
            .prop_map(|arg| TelnetFrame::Subnegotiate(TelnetArgument::Vmware(arg))),
    ]
}

/// The event a well-formed frame decodes back to.
fn expected_event(frame: &TelnetFrame) -> TelnetEvent {
    match frame {
        TelnetFrame::Data(byte) => TelnetEvent::Data(*byte),
        TelnetFrame::Break => TelnetEvent::Break,
        TelnetFrame::GoAhead => TelnetEvent::GoAhead,
        TelnetFrame::Subnegotiate(argument) => TelnetEvent::Subnegotiate(argument.clone()),
        frame => panic!("not generated: {frame:?}"),
    }
}

proptest! {
    #[test]
    fn decode_inverts_encode(frames in proptest::collection::vec(arb_frame(), 0..24)) {
        let mut codec = TelnetCodec::new();
        let mut wire = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).expect("encode ok");
        }

        let expected: Vec<TelnetEvent> = frames.iter().map(expected_event).collect();
        let actual = decode_all(&mut codec, &mut wire);
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn decode_is_split_invariant(
        frames in proptest::collection::vec(arb_frame(), 1..12),
        split in any::<prop::sample::Index>(),
    ) {
        let mut codec = TelnetCodec::new();
        let mut wire = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).expect("encode ok");
        }

        // Feed the wire bytes in two arbitrary chunks
        let at = split.index(wire.len() + 1);
        let mut second = wire.split_off(at);
        let mut events = decode_all(&mut codec, &mut wire);
        events.extend(decode_all(&mut codec, &mut second));

        let expected: Vec<TelnetEvent> = frames.iter().map(expected_event).collect();
        prop_assert_eq!(events, expected);
    }

    #[test]
    fn arbitrary_data_bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut codec = TelnetCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(&data[..], &mut wire).expect("encode ok");

        let bytes: Vec<u8> = decode_all(&mut codec, &mut wire)
            .into_iter()
            .map(|event| match event {
                TelnetEvent::Data(byte) => byte,
                event => panic!("unexpected event {event:?}"),
            })
            .collect();
        prop_assert_eq!(bytes, data);
    }
}

#[test]
fn unknown_option_subnegotiation_passthrough() {
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::new();
    codec
        .encode(
            TelnetFrame::Subnegotiate(TelnetArgument::Unknown(
                TelnetOption::Authentication,
                BytesMut::from(&[0x00, 0x01][..]),
            )),
            &mut wire,
        )
        .expect("encode ok");

    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(
        events,
        vec![TelnetEvent::Subnegotiate(TelnetArgument::Unknown(
            TelnetOption::Authentication,
            BytesMut::from(&[0x00, 0x01][..])
        ))]
    );
}
