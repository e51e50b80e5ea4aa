//! Error types for Marmot group operations.
//!
//! Every rejected transition surfaces as a [`GroupError`]. The variants fall
//! into four groups that callers treat differently:
//!
//! - Decode errors: malformed key packages, extensions or event payloads
//! - Structural errors: messages that do not fit the current epoch or tree
//! - Policy errors: named conditions such as a missing group data extension
//! - Engine and storage errors: failures inside collaborators
//!
//! A `GroupError` never implies partial state: the group is exactly as it was
//! before the failing call.

use marmot_proto::{CodecError, EventError};
use thiserror::Error;

use crate::storage::StorageError;

/// Errors from group state machine, key package and proposal operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// Group context has no Marmot Group Data extension
    #[error("group context has no Marmot group data extension")]
    NoMarmotGroupData,

    /// Key package does not advertise the group data extension
    #[error("key package does not support the Marmot group data extension")]
    MissingGroupDataSupport,

    /// Key package could not be decoded or failed verification
    #[error("invalid key package: {reason}")]
    InvalidKeyPackage {
        /// What was wrong with it
        reason: String,
    },

    /// Cipher suite id is unknown or not supported by the provider
    #[error("unsupported cipher suite: {0:#06x}")]
    UnsupportedCipherSuite(u16),

    /// Key package or record uses a different cipher suite than the group
    #[error("cipher suite mismatch: group uses {expected:#06x}, got {actual:#06x}")]
    CipherSuiteMismatch {
        /// Suite of the group
        expected: u16,
        /// Suite that was offered
        actual: u16,
    },

    /// Message targets a different epoch than the group is in
    #[error("epoch mismatch: group is at {current}, message targets {received}")]
    EpochMismatch {
        /// Current group epoch
        current: u64,
        /// Epoch named by the message
        received: u64,
    },

    /// No member occupies the given leaf
    #[error("no member at leaf index {0}")]
    MemberNotFound(u32),

    /// Credential is not a well-formed Marmot identity
    #[error("invalid identity: {reason}")]
    InvalidIdentity {
        /// What was wrong with it
        reason: String,
    },

    /// Message type is not valid for the operation
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// What the operation accepts
        expected: &'static str,
        /// What arrived
        actual: String,
    },

    /// Caller-supplied policy refused an incoming commit
    #[error("commit rejected by policy: {reason}")]
    Unauthorized {
        /// Why the policy refused
        reason: String,
    },

    /// Explicit proposals cannot go into one commit together
    #[error("conflicting proposals: {reason}")]
    ConflictingProposals {
        /// What conflicts
        reason: String,
    },

    /// This client is no longer a member of the group
    #[error("group is inactive: this client was removed")]
    Inactive,

    /// Group is not present in engine storage
    #[error("group {group_id} not found")]
    GroupNotFound {
        /// Hex group id
        group_id: String,
    },

    /// Welcome is for a group this client is still an active member of
    #[error("already a member of group {group_id}")]
    AlreadyMember {
        /// Hex group id
        group_id: String,
    },

    /// Signature key of the loaded group does not belong to this client
    #[error("group {group_id} is bound to a different signature key")]
    SignerMismatch {
        /// Hex group id
        group_id: String,
    },

    /// Group data extension failed to encode or decode
    #[error("group data codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport event could not be interpreted
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// MLS message (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The MLS engine rejected an operation
    #[error("mls engine failed to {operation}: {reason}")]
    Engine {
        /// Operation that failed
        operation: &'static str,
        /// Engine's error message
        reason: String,
    },
}

impl GroupError {
    /// Build an [`GroupError::Engine`] from any displayable engine error.
    pub fn engine(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Engine { operation, reason: err.to_string() }
    }

    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Only storage backends fail transiently. Everything else describes the
    /// input or the group and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }

    /// Returns true if the error is a decode failure of untrusted input.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Codec(_)
                | Self::Event(_)
                | Self::InvalidKeyPackage { .. }
                | Self::Serialization(_)
        )
    }
}
