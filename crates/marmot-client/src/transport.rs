//! Transport capabilities.
//!
//! The client never talks to relays or encrypts events itself. It hands
//! events to two collaborators:
//!
//! - [`Publisher`]: delivers an event to a set of relays
//! - [`Sealer`]: wraps an event for a group or a single member, and unwraps
//!   incoming ones
//!
//! Production wires these to a relay pool and NIP-44/NIP-59 wrapping; the
//! simulation harness provides in-memory doubles with fault injection.

use async_trait::async_trait;
use marmot_core::mls::IdentityKey;
use marmot_proto::Event;
use thiserror::Error;

/// Publication failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No relay could be reached
    #[error("relays unreachable: {0}")]
    Unreachable(String),

    /// A relay refused the event
    #[error("relay {relay} rejected event: {reason}")]
    Rejected {
        /// Relay URL
        relay: String,
        /// Reason given by the relay
        reason: String,
    },

    /// Publication did not complete in time
    #[error("publish timed out")]
    Timeout,
}

impl TransportError {
    /// Returns true if publishing again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

/// Wrapping failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SealError {
    /// Event could not be wrapped
    #[error("seal failed: {0}")]
    Seal(String),

    /// Event could not be unwrapped or is not addressed to us
    #[error("open failed: {0}")]
    Open(String),
}

/// Who a sealed event is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every member of the group with this transport group id
    Group([u8; 32]),
    /// A single member, addressed by identity key
    Member(IdentityKey),
}

/// Delivers events to relays.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Publish `event` to `relays`.
    ///
    /// Returns once the event is accepted. An error means the event must be
    /// treated as never sent.
    async fn publish(&self, event: &Event, relays: &[String]) -> Result<(), TransportError>;
}

/// Event-level encryption.
pub trait Sealer: Send + Sync + 'static {
    /// Wrap `rumor` so only `recipient` can read it.
    fn seal(&self, rumor: &Event, recipient: &Recipient) -> Result<Event, SealError>;

    /// Unwrap an event sealed by [`Self::seal`].
    fn open(&self, sealed: &Event) -> Result<Event, SealError>;
}
