#![no_main]

use hivenet_core::router::RouterHeader;
use hivenet_core::varint::{decode_u64, encode_u64, MAX_VARINT_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some((value, used)) = decode_u64(data) {
        assert!(used <= MAX_VARINT_LEN);
        let mut buf = [0u8; MAX_VARINT_LEN];
        let n = encode_u64(&mut buf, value);
        assert_eq!(decode_u64(&buf[..n]), Some((value, n)));
    }

    if let Some((header, used)) = RouterHeader::decode(data) {
        assert!(used <= data.len());
        let bytes = header.to_bytes();
        assert_eq!(RouterHeader::decode(&bytes), Some((header, bytes.len())));
    }
});
