#![no_main]

use hybrid_envelope::der::{parse_header, Reader};
use hybrid_envelope::wire;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = parse_header(data);

    let mut r = Reader::new(data);
    while r.read_any().is_ok() {}

    // Anything that decodes must re-encode to the exact bytes consumed.
    if let Ok((envelope, used)) = wire::decode(data) {
        assert_eq!(envelope.encode(), &data[..used]);
    }

    let _ = wire::decode_encrypted_key(data);
});
