//! Marmot group orchestration over OpenMLS.
//!
//! Turns member intent (invite, remove, update metadata) into MLS proposals
//! and commits while keeping the Marmot Group Data extension intact in the
//! group context across every epoch.
//!
//! # Architecture
//!
//! - [`mls::key_package`]: key packages that advertise group data support
//! - [`mls::proposals`]: pure builders from a [`mls::GroupView`] snapshot to a
//!   [`mls::Proposal`]
//! - [`mls::group`]: the per-group state machine with staged, revocable
//!   changes
//! - [`storage`]: persistence capability for groups and key packages
//! - [`env`]: randomness and wall clock, swappable for deterministic tests
//!
//! Nothing here performs network I/O. Publishing staged messages and deciding
//! who may commit are the caller's job.

#![forbid(unsafe_code)]

pub mod env;
pub mod error;
pub mod mls;
pub mod storage;

pub use env::{Environment, SystemEnv};
pub use error::GroupError;
