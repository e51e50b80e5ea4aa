//! Marmot groups on top of MLS (RFC 9420).
//!
//! The MLS engine (OpenMLS) does the cryptography: key schedule, ratchet
//! tree, signatures. This module decides what goes into proposals and commits
//! and keeps the Marmot group data extension valid across epochs.
//!
//! # Components
//!
//! - [`key_package`]: key packages advertising group data support
//! - [`proposals`]: pure proposal builders
//! - [`group`]: per-group state machine with staged changes
//! - [`view`]: materialized group snapshot
//! - [`provider`]: `OpenMLS` provider integration
//! - [`constants`]: protocol constants

pub mod constants;
pub mod group;
pub mod key_package;
pub mod proposals;
pub mod provider;
pub mod view;

pub use constants::{DEFAULT_CIPHERSUITE, GROUP_DATA_EXTENSION};
pub use group::{
    CommitSummary, GroupOptions, GroupStateMachine, LocalMember, Outgoing, OutgoingKind, Received,
    Staged,
};
pub use key_package::CompleteKeyPackage;
pub use proposals::{GroupDataPatch, KeyPackageSource, Proposal};
pub use provider::MarmotProvider;
pub use view::{GroupView, IdentityKey, Member, PrivateGroupId};
