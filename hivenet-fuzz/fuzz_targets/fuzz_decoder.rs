#![no_main]

use bytes::Bytes;
use hivenet_core::proto::ProtoType;
use hivenet_io::codec::{Decoded, FrameDecoder};
use libfuzzer_sys::fuzz_target;

const MAX_PACKAGE: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    // First byte picks the framing, the rest is the inbound byte stream.
    let Some((&selector, stream)) = data.split_first() else {
        return;
    };
    let proto = match selector % 4 {
        0 => ProtoType::Rpc,
        1 => ProtoType::Pack,
        2 => ProtoType::Common,
        _ => ProtoType::Text,
    };
    let mut decoder = FrameDecoder::new(proto, MAX_PACKAGE);
    if selector & 0x80 != 0 {
        decoder = decoder.with_handshake(Bytes::from_static(b"fuzz-key"));
    }

    let mut offset = 0;
    while offset < stream.len() {
        match decoder.decode(&stream[offset..]) {
            Ok(Decoded::Incomplete) | Err(_) => break,
            Ok(Decoded::Skip(n)) | Ok(Decoded::Frame { consumed: n, .. }) => {
                assert!(n > 0, "decoder made no progress");
                assert!(offset + n <= stream.len(), "decoder consumed past input");
                offset += n;
            }
        }
    }
});
