//! Fuzz target for GroupData::decode
//!
//! Arbitrary bytes through the 0xF2EE extension decoder.
//!
//! # Invariants
//!
//! - Decoding NEVER panics; invalid input returns an error
//! - Anything that decodes re-encodes to exactly the input bytes, so every
//!   accepted encoding is the canonical one

#![no_main]

use libfuzzer_sys::fuzz_target;
use marmot_proto::GroupData;

fuzz_target!(|data: &[u8]| {
    let Ok(decoded) = GroupData::decode(data) else {
        return;
    };

    let encoded = decoded.encode().expect("decoded group data must re-encode");
    assert_eq!(encoded, data, "accepted a non-canonical encoding");
});
