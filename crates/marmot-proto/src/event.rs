//! Transport event envelope.
//!
//! Relays carry events, not raw MLS messages. An [`Event`] has a numeric kind
//! that tells subscribers how to interpret it, a set of string tags used for
//! routing and metadata, and a text `content` field. Binary MLS payloads are
//! hex encoded into `content`.
//!
//! Signing, event ids and wrapping (confidential delivery) belong to the
//! transport layer and are not modelled here.

use serde::{Deserialize, Serialize};

use crate::errors::EventError;

/// Event kinds used by Marmot. These values are part of the wire contract.
pub mod kind {
    /// Public key package advertisement
    pub const KEY_PACKAGE: u16 = 443;

    /// MLS Welcome for a single invitee (always delivered wrapped)
    pub const WELCOME: u16 = 444;

    /// MLS handshake or application message for a group
    pub const GROUP_EVENT: u16 = 445;

    /// Confidential envelope around another event
    pub const GIFT_WRAP: u16 = 1059;
}

/// Tag names used on Marmot events.
pub mod tag {
    /// Transport group id (hex) on group events
    pub const GROUP: &str = "h";

    /// Recipient identity (hex) on wrapped events
    pub const RECIPIENT: &str = "p";

    /// Relay URLs
    pub const RELAYS: &str = "relays";

    /// MLS protocol version of a key package
    pub const PROTOCOL_VERSION: &str = "mls_protocol_version";

    /// Cipher suite of a key package, `0x%04x`
    pub const CIPHERSUITE: &str = "mls_ciphersuite";

    /// Extension types a key package supports, each `0x%04x`
    pub const EXTENSIONS: &str = "mls_extensions";

    /// Name of the client that produced the event
    pub const CLIENT: &str = "client";
}

/// A single event tag: a name followed by zero or more values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from a name and its values.
    pub fn new<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = vec![name.to_string()];
        parts.extend(values.into_iter().map(Into::into));
        Self(parts)
    }

    /// Tag name, if the tag is non-empty.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Values after the name.
    pub fn values(&self) -> &[String] {
        self.0.get(1..).unwrap_or_default()
    }
}

/// Transport event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind (see [`kind`])
    pub kind: u16,

    /// Creation time, seconds since the Unix epoch
    pub created_at: u64,

    /// Text content; hex-encoded bytes for MLS payloads
    pub content: String,

    /// Ordered tags
    pub tags: Vec<Tag>,
}

impl Event {
    /// Create an event carrying `payload` hex-encoded in its content.
    pub fn with_payload(kind: u16, created_at: u64, payload: &[u8]) -> Self {
        Self { kind, created_at, content: hex::encode(payload), tags: Vec::new() }
    }

    /// Group event (kind 445) addressed by transport group id.
    pub fn group_event(transport_group_id: &[u8; 32], created_at: u64, message: &[u8]) -> Self {
        Self::with_payload(kind::GROUP_EVENT, created_at, message)
            .tag(Tag::new(tag::GROUP, [hex::encode(transport_group_id)]))
    }

    /// Welcome event (kind 444) listing the relays the invitee should use.
    pub fn welcome(created_at: u64, welcome: &[u8], relays: &[String]) -> Self {
        Self::with_payload(kind::WELCOME, created_at, welcome)
            .tag(Tag::new(tag::RELAYS, relays.iter().cloned()))
    }

    /// Append a tag.
    #[must_use]
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// First tag named `name`.
    pub fn find_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name() == Some(name))
    }

    /// Values of the first tag named `name`.
    pub fn tag_values(&self, name: &str) -> Option<&[String]> {
        self.find_tag(name).map(Tag::values)
    }

    /// First value of the tag named `name`, or `MissingTag`.
    pub fn required_tag(&self, name: &'static str) -> Result<&str, EventError> {
        self.tag_values(name)
            .and_then(<[String]>::first)
            .map(String::as_str)
            .ok_or(EventError::MissingTag(name))
    }

    /// Fails unless the event has the `expected` kind.
    pub fn ensure_kind(&self, expected: u16) -> Result<(), EventError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(EventError::UnexpectedKind { expected, actual: self.kind })
        }
    }

    /// Decode the hex payload from `content`.
    pub fn payload(&self) -> Result<Vec<u8>, EventError> {
        hex::decode(self.content.trim()).map_err(|e| EventError::InvalidContent(e.to_string()))
    }

    /// Transport group id from the `h` tag.
    pub fn transport_group_id(&self) -> Result<[u8; 32], EventError> {
        let value = self.required_tag(tag::GROUP)?;
        let bytes = hex::decode(value)
            .map_err(|e| EventError::InvalidTag { tag: tag::GROUP, reason: e.to_string() })?;
        bytes.try_into().map_err(|bytes: Vec<u8>| EventError::InvalidTag {
            tag: tag::GROUP,
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        })
    }
}

/// Format an MLS numeric identifier as it appears in tags (`0xf2ee`).
pub fn format_id(id: u16) -> String {
    format!("{id:#06x}")
}

/// Parse a tag identifier written as `0x` followed by hex digits.
pub fn parse_id(tag: &'static str, value: &str) -> Result<u16, EventError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| EventError::InvalidTag {
            tag,
            reason: format!("missing 0x prefix: {value}"),
        })?;
    u16::from_str_radix(digits, 16)
        .map_err(|e| EventError::InvalidTag { tag, reason: e.to_string() })
}
