//! Fuzz target for structured GroupData encoding
//!
//! Builds group data from arbitrary fields, encodes it, then decodes the full
//! encoding and every strict prefix of it.
//!
//! # Invariants
//!
//! - decode(encode(d)) == d
//! - Every strict prefix of a valid encoding is rejected

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use marmot_proto::GroupData;

#[derive(Debug, Arbitrary)]
struct Fields {
    version: u16,
    transport_group_id: [u8; 32],
    name: String,
    description: String,
    admin_pubkeys: Vec<[u8; 32]>,
    relays: Vec<String>,
    image_hash: [u8; 32],
    image_key: [u8; 32],
    image_nonce: [u8; 12],
}

fuzz_target!(|fields: Fields| {
    let data = GroupData {
        version: fields.version,
        transport_group_id: fields.transport_group_id,
        name: fields.name,
        description: fields.description,
        admin_pubkeys: fields.admin_pubkeys,
        relays: fields.relays,
        image_hash: fields.image_hash,
        image_key: fields.image_key,
        image_nonce: fields.image_nonce,
    };

    // Fuzzer-sized inputs stay far below the varint limit
    let encoded = data.encode().expect("encode");
    assert_eq!(GroupData::decode(&encoded).as_ref(), Ok(&data));

    for len in 0..encoded.len() {
        assert!(GroupData::decode(&encoded[..len]).is_err(), "prefix of {len} bytes accepted");
    }
});
