//! Client error type.

use marmot_core::{GroupError, storage::StorageError};
use marmot_proto::EventError;
use thiserror::Error;

use crate::transport::{SealError, TransportError};

/// Errors from client operations.
///
/// Every variant means the group state is what it was before the call, with
/// one exception: [`ClientError::Persist`] is raised after a published change
/// was merged, so the in-memory group moved on while the store did not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Group data lists no relays to publish to
    #[error("group has no relays configured")]
    NoGroupRelays,

    /// Neither the caller nor the configuration named a relay for a key package
    #[error("no relays to publish the key package to")]
    NoKeyPackageRelays,

    /// Commit policy refused a local action
    #[error("only group admins may {action}")]
    NotAdmin {
        /// Action that was refused
        action: &'static str,
    },

    /// No record for this group id
    #[error("unknown group {group_id}")]
    UnknownGroup {
        /// Hex group id
        group_id: String,
    },

    /// Event belongs to another group
    #[error("event for transport group {actual}, expected {expected}")]
    WrongGroup {
        /// Hex transport group id of the group
        expected: String,
        /// Hex transport group id on the event
        actual: String,
    },

    /// Client was closed
    #[error("client is closed")]
    Closed,

    /// Group state machine rejected the operation
    #[error(transparent)]
    Group(#[from] GroupError),

    /// Store read or write failed before any change
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Change is published and merged but could not be persisted
    #[error("failed to persist group after epoch {epoch}: {source}")]
    Persist {
        /// Epoch the group is at in memory
        epoch: u64,
        /// Store failure
        source: StorageError,
    },

    /// Incoming event is malformed
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Publication failed; nothing was committed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Event wrapping failed
    #[error("seal error: {0}")]
    Seal(#[from] SealError),
}

impl ClientError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Group(e) => e.is_transient(),
            Self::Storage(e) | Self::Persist { source: e, .. } => e.is_transient(),
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}
