#![no_main]

use cuesync_wire::{
    split_datagram, Ack, CuePrepare, CueRef, MessageType, Pong, TimeResp, WirePayload,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok((header, payload)) = split_datagram(data) else {
        return;
    };
    assert!(payload.len() <= header.payload_len as usize);

    // Re-encoding a decoded header must be lossless
    let reencoded = header.encode();
    assert_eq!(&reencoded[..], &data[..reencoded.len()]);

    match header.message_type() {
        Some(MessageType::CuePrepare) => {
            if let Some(prepare) = CuePrepare::decode(payload) {
                let _ = prepare.to_vec();
            }
        }
        Some(MessageType::CueFire) | Some(MessageType::CueCancel) => {
            let _ = CueRef::decode(payload);
        }
        Some(MessageType::Pong) => {
            if let Some(pong) = Pong::decode(payload) {
                let _ = pong.name_str();
            }
        }
        Some(MessageType::Ack) => {
            let _ = Ack::decode(payload);
        }
        Some(MessageType::TimeResp) => {
            let _ = TimeResp::decode(payload);
        }
        _ => {}
    }
});
