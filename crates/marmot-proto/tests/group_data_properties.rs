//! Property-based tests for the group data extension codec.
//!
//! These tests verify encoding properties for ALL generated group data values
//! and for byte strings derived from them, not just hand-picked examples.

use marmot_proto::{CodecError, GroupData};
use proptest::prelude::*;

/// Strategy for relay URLs, including multi-byte UTF-8
fn arbitrary_relay() -> impl Strategy<Value = String> {
    prop_oneof![
        "wss://[a-z]{1,20}\\.[a-z]{2,5}",
        "wss://relay\\.example/[a-zé]{0,10}",
        ".{0,40}",
    ]
}

/// Strategy for arbitrary group data
fn arbitrary_group_data() -> impl Strategy<Value = GroupData> {
    (
        any::<u16>(),
        any::<[u8; 32]>(),
        ".{0,80}",
        ".{0,200}",
        prop::collection::vec(any::<[u8; 32]>(), 0..8),
        prop::collection::vec(arbitrary_relay(), 0..6),
        any::<[u8; 32]>(),
        any::<[u8; 32]>(),
        any::<[u8; 12]>(),
    )
        .prop_map(
            |(
                version,
                transport_group_id,
                name,
                description,
                admin_pubkeys,
                relays,
                image_hash,
                image_key,
                image_nonce,
            )| GroupData {
                version,
                transport_group_id,
                name,
                description,
                admin_pubkeys,
                relays,
                image_hash,
                image_key,
                image_nonce,
            },
        )
}

#[test]
fn prop_group_data_roundtrip() {
    proptest!(|(data in arbitrary_group_data())| {
        let encoded = data.encode().expect("encode should succeed");
        let decoded = GroupData::decode(&encoded).expect("decode should succeed");

        // PROPERTY: decode(encode(x)) == x
        prop_assert_eq!(decoded, data);
    });
}

#[test]
fn prop_decoded_bytes_reencode_identically() {
    proptest!(|(
        data in arbitrary_group_data(),
        position in any::<prop::sample::Index>(),
        replacement in any::<u8>(),
    )| {
        let mut bytes = data.encode().expect("encode should succeed");
        let index = position.index(bytes.len());
        bytes[index] = replacement;

        // PROPERTY: whatever decodes is in canonical form
        if let Ok(decoded) = GroupData::decode(&bytes) {
            prop_assert_eq!(decoded.encode().expect("re-encode should succeed"), bytes);
        }
    });
}

#[test]
fn prop_arbitrary_bytes_never_panic() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..512))| {
        // PROPERTY: decoding untrusted input returns a value or an error
        if let Ok(decoded) = GroupData::decode(&bytes) {
            prop_assert_eq!(decoded.encode().expect("re-encode should succeed"), bytes);
        }
    });
}

#[test]
fn prop_truncation_is_rejected() {
    proptest!(|(data in arbitrary_group_data(), cut in any::<prop::sample::Index>())| {
        let encoded = data.encode().expect("encode should succeed");
        // Keep between 0 and len - 1 bytes
        let keep = cut.index(encoded.len());

        let result = GroupData::decode(&encoded[..keep]);

        // PROPERTY: any strict prefix fails to decode
        prop_assert!(result.is_err(), "prefix of {} / {} bytes decoded", keep, encoded.len());
    });
}

#[test]
fn prop_trailing_bytes_are_rejected() {
    proptest!(|(
        data in arbitrary_group_data(),
        extra in prop::collection::vec(any::<u8>(), 1..16),
    )| {
        let mut encoded = data.encode().expect("encode should succeed");
        encoded.extend_from_slice(&extra);

        // PROPERTY: the encoding is self-delimiting and must consume all input
        prop_assert_eq!(GroupData::decode(&encoded), Err(CodecError::TrailingBytes(extra.len())));
    });
}

#[test]
fn non_minimal_version_is_rejected() {
    let data = GroupData::new([7; 32], "n");
    let mut encoded = data.encode().expect("encode should succeed");

    // Replace the one-byte version 0x01 with its two-byte form 0x4001
    encoded.splice(0..1, [0x40, 0x01]);

    assert_eq!(
        GroupData::decode(&encoded),
        Err(CodecError::NonMinimalVarint { field: "version", value: 1 })
    );
}

#[test]
fn long_fields_use_wider_prefixes() {
    let mut data = GroupData::new([0; 32], "x".repeat(100));
    data.description = "y".repeat(20_000);

    let encoded = data.encode().expect("encode should succeed");

    // version (1) + id (32), then a two-byte length for the 100-byte name
    assert_eq!(&encoded[33..35], &[0x40, 100]);
    assert_eq!(GroupData::decode(&encoded).expect("decode should succeed"), data);
}
