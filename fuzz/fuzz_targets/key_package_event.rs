//! Fuzz target for key package events
//!
//! Arbitrary kind-443 style events through kind and tag checks, payload
//! decoding, TLS parsing and the group data capability check.
//!
//! # Invariants
//!
//! - Validation NEVER panics; invalid events return an error
//! - Events of any other kind are always rejected

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use marmot_core::mls::key_package;
use marmot_proto::{Event, Tag, kind, tag};
use openmls_rust_crypto::RustCrypto;

#[derive(Debug, Arbitrary)]
struct FuzzEvent {
    marmot_kind: bool,
    other_kind: u16,
    ciphersuite: Option<String>,
    version: Option<String>,
    extensions: Vec<String>,
    extra_tags: Vec<Vec<String>>,
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzEvent| {
    let event_kind = if input.marmot_kind { kind::KEY_PACKAGE } else { input.other_kind };
    let mut event = Event::with_payload(event_kind, 0, &input.payload)
        .tag(Tag::new(tag::EXTENSIONS, input.extensions));
    if let Some(version) = input.version {
        event = event.tag(Tag::new(tag::PROTOCOL_VERSION, [version]));
    }
    if let Some(ciphersuite) = input.ciphersuite {
        event = event.tag(Tag::new(tag::CIPHERSUITE, [ciphersuite]));
    }
    for extra in input.extra_tags {
        event = event.tag(Tag(extra));
    }

    let crypto = RustCrypto::default();
    if let Ok(parsed) = key_package::from_event(&crypto, &event) {
        assert_eq!(event_kind, kind::KEY_PACKAGE);
        let _ = key_package::require_group_support(&parsed);
    }
});
