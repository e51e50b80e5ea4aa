//! Marmot Group Data extension.
//!
//! Every Marmot group carries exactly one instance of this extension in its
//! MLS group context. It holds the application metadata members agree on:
//! display name, description, admins, relays, and the key material for the
//! group image.
//!
//! # Wire Layout
//!
//! Fields appear in fixed order. `varint` is the MLS variable-length integer
//! (see [`crate::varint`]).
//!
//! ```text
//! version             varint (fits in u16)
//! transport_group_id  [u8; 32]
//! name                varint length + UTF-8
//! description         varint length + UTF-8
//! admin_pubkeys       varint count + count * [u8; 32]
//! relays              varint count + count * (varint length + UTF-8)
//! image_hash          [u8; 32]
//! image_key           [u8; 32]
//! image_nonce         [u8; 12]
//! ```
//!
//! # Invariants
//!
//! - Canonical: for any `b` where `decode(b)` succeeds, `encode(decode(b)) ==
//!   b`. Decoding rejects non-minimal varints and trailing bytes to make this
//!   hold.
//! - No partial results: a decode error never yields a populated value.

use bytes::BufMut;

use crate::{
    errors::{CodecError, Result},
    varint::{Reader, put_varint},
};

/// Extension type reserved for the Marmot Group Data extension.
pub const MARMOT_GROUP_DATA_EXTENSION_TYPE: u16 = 0xF2EE;

/// Size of an identity public key.
pub const PUBKEY_LEN: usize = 32;

/// Size of the image encryption nonce.
pub const IMAGE_NONCE_LEN: usize = 12;

/// Application metadata shared by all members of a Marmot group.
///
/// Decoding performs structural checks only. Whether admin keys are valid
/// curve points or relays are reachable URLs is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupData {
    /// Extension format version
    pub version: u16,

    /// Identifier used to address the group on relays. Distinct from the MLS
    /// group id, which never leaves the client.
    pub transport_group_id: [u8; 32],

    /// Display name
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Identity keys allowed to commit changes, in wire order
    pub admin_pubkeys: Vec<[u8; PUBKEY_LEN]>,

    /// Relay URLs where group events are published, in preference order
    pub relays: Vec<String>,

    /// Hash of the encrypted group image (all zero when unset)
    pub image_hash: [u8; 32],

    /// Symmetric key for the group image (all zero when unset)
    pub image_key: [u8; 32],

    /// Nonce for the group image (all zero when unset)
    pub image_nonce: [u8; IMAGE_NONCE_LEN],
}

impl GroupData {
    /// Version written by this implementation.
    pub const CURRENT_VERSION: u16 = 1;

    /// Create group data with the current version and no image.
    pub fn new(transport_group_id: [u8; 32], name: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            transport_group_id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether `pubkey` is listed as an admin.
    pub fn is_admin(&self, pubkey: &[u8]) -> bool {
        self.admin_pubkeys.iter().any(|admin| admin.as_slice() == pubkey)
    }

    /// Encode into the extension wire format.
    ///
    /// # Errors
    ///
    /// - `CodecError::ValueTooLarge` if a string or list is longer than the
    ///   varint range allows
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode into an existing buffer.
    ///
    /// On error the buffer may hold a prefix of the encoding.
    pub fn encode_into(&self, dst: &mut impl BufMut) -> Result<()> {
        put_varint(dst, "version", usize::from(self.version))?;
        dst.put_slice(&self.transport_group_id);
        put_string(dst, "name", &self.name)?;
        put_string(dst, "description", &self.description)?;

        put_varint(dst, "admin_pubkeys", self.admin_pubkeys.len())?;
        for admin in &self.admin_pubkeys {
            dst.put_slice(admin);
        }

        put_varint(dst, "relays", self.relays.len())?;
        for relay in &self.relays {
            put_string(dst, "relay", relay)?;
        }

        dst.put_slice(&self.image_hash);
        dst.put_slice(&self.image_key);
        dst.put_slice(&self.image_nonce);

        Ok(())
    }

    /// Decode from the extension wire format.
    ///
    /// # Errors
    ///
    /// - `CodecError::Truncated` if input ends inside a field
    /// - `CodecError::LengthOverflow` if a prefix claims more than remains
    /// - `CodecError::InvalidVarintPrefix` / `NonMinimalVarint` for malformed
    ///   integers
    /// - `CodecError::InvalidUtf8` for string fields that are not UTF-8
    /// - `CodecError::VersionOutOfRange` if the version exceeds `u16`
    /// - `CodecError::TrailingBytes` if input continues past `image_nonce`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let raw_version = reader.varint("version")?;
        let version =
            u16::try_from(raw_version).map_err(|_| CodecError::VersionOutOfRange(raw_version))?;
        let transport_group_id = reader.array("transport_group_id")?;
        let name = reader.string("name")?;
        let description = reader.string("description")?;

        let admin_count = reader.length("admin_pubkeys", PUBKEY_LEN)?;
        let mut admin_pubkeys = Vec::with_capacity(admin_count);
        for _ in 0..admin_count {
            admin_pubkeys.push(reader.array("admin_pubkeys")?);
        }

        // Every relay needs at least its one-byte length prefix
        let relay_count = reader.length("relays", 1)?;
        let mut relays = Vec::with_capacity(relay_count);
        for _ in 0..relay_count {
            relays.push(reader.string("relay")?);
        }

        let image_hash = reader.array("image_hash")?;
        let image_key = reader.array("image_key")?;
        let image_nonce = reader.array("image_nonce")?;

        reader.finish()?;

        Ok(Self {
            version,
            transport_group_id,
            name,
            description,
            admin_pubkeys,
            relays,
            image_hash,
            image_key,
            image_nonce,
        })
    }

    fn encoded_len_hint(&self) -> usize {
        let strings: usize = self.relays.iter().map(|r| r.len() + 4).sum();
        4 + 32
            + self.name.len()
            + self.description.len()
            + 8
            + 4
            + self.admin_pubkeys.len() * PUBKEY_LEN
            + 4
            + strings
            + 32
            + 32
            + IMAGE_NONCE_LEN
    }
}

fn put_string(dst: &mut impl BufMut, field: &'static str, value: &str) -> Result<()> {
    put_varint(dst, field, value.len())?;
    dst.put_slice(value.as_bytes());
    Ok(())
}
