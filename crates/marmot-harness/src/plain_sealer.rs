//! Sealer that wraps without encrypting.
//!
//! Stands in for NIP-44 encryption and NIP-59 gift wrapping. The outer event
//! has the same addressing a real wrap would (kind 445 with an `h` tag for
//! groups, kind 1059 with a `p` tag for members) and carries the inner event
//! CBOR-encoded and hex-encoded in its content.

use marmot_client::{Recipient, SealError, Sealer};
use marmot_core::mls::IdentityKey;
use marmot_proto::{Event, Tag, kind, tag};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Envelope {
    recipient: Option<IdentityKey>,
    rumor: Event,
}

/// Plaintext sealer for one client.
///
/// Opens group events for any group and gift wraps addressed to `owner` only.
#[derive(Debug, Clone, Copy)]
pub struct PlainSealer {
    owner: IdentityKey,
}

impl PlainSealer {
    /// Sealer for the client with identity `owner`.
    pub fn new(owner: IdentityKey) -> Self {
        Self { owner }
    }
}

impl Sealer for PlainSealer {
    fn seal(&self, rumor: &Event, recipient: &Recipient) -> Result<Event, SealError> {
        let (outer, address, member) = match recipient {
            Recipient::Group(id) => {
                (kind::GROUP_EVENT, Tag::new(tag::GROUP, [hex::encode(id)]), None)
            },
            Recipient::Member(identity) => {
                let address = Tag::new(tag::RECIPIENT, [hex::encode(identity)]);
                (kind::GIFT_WRAP, address, Some(*identity))
            },
        };

        let mut bytes = Vec::new();
        ciborium::into_writer(&Envelope { recipient: member, rumor: rumor.clone() }, &mut bytes)
            .map_err(|e| SealError::Seal(e.to_string()))?;

        Ok(Event::with_payload(outer, rumor.created_at, &bytes).tag(address))
    }

    fn open(&self, sealed: &Event) -> Result<Event, SealError> {
        if sealed.kind != kind::GROUP_EVENT && sealed.kind != kind::GIFT_WRAP {
            return Err(SealError::Open(format!("kind {} is not a sealed event", sealed.kind)));
        }

        let bytes = sealed.payload().map_err(|e| SealError::Open(e.to_string()))?;
        let envelope: Envelope =
            ciborium::from_reader(bytes.as_slice()).map_err(|e| SealError::Open(e.to_string()))?;

        match envelope.recipient {
            Some(recipient) if recipient != self.owner => {
                Err(SealError::Open("gift wrap addressed to another member".to_string()))
            },
            _ => Ok(envelope.rumor),
        }
    }
}
