//! Wire formats for the Marmot group messaging protocol.
//!
//! Marmot layers group metadata and transport framing on top of MLS. This
//! crate owns the two byte-level contracts that must match across
//! implementations:
//!
//! - [`GroupData`]: the Marmot Group Data extension (type `0xF2EE`) embedded in
//!   every MLS group context. Encoding is canonical, so any bytes that decode
//!   re-encode to exactly the same bytes.
//! - [`Event`]: the transport event envelope (key packages, welcomes, group
//!   events) that carries MLS payloads to relays.
//!
//! No cryptography happens here. MLS payloads are opaque bytes and event
//! wrapping is done by the caller.

#![forbid(unsafe_code)]

pub mod errors;
pub mod event;
pub mod group_data;
pub mod varint;

pub use errors::{CodecError, EventError, Result};
pub use event::{Event, Tag, kind, tag};
pub use group_data::{GroupData, MARMOT_GROUP_DATA_EXTENSION_TYPE};
