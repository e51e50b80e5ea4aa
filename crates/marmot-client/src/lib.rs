//! Client
//!
//! Runs Marmot group actions against relays and keeps one authoritative state
//! machine per group.
//!
//! # Architecture
//!
//! The client sits between the pure group state machine in [`marmot_core`]
//! and the outside world. It owns no cryptography and no sockets; it
//! sequences calls to collaborators so that a group only changes locally once
//! the change is visible to the other members.
//!
//! # Components
//!
//! - [`Client`]: per-member registry of open groups, single instance per id
//! - [`Transaction`]: publish-then-commit execution of one [`GroupAction`]
//! - [`transport`]: [`Publisher`] and [`Sealer`] capabilities
//! - [`ClientConfig`]: relays, cipher suite, [`CommitPolicy`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod policy;
mod transaction;
pub mod transport;

pub use client::{Backends, Client, SharedGroup};
pub use config::{ClientConfig, CommitPolicy};
pub use error::ClientError;
pub use marmot_core::{
    env::Environment,
    mls::{GroupDataPatch, GroupOptions, KeyPackageSource, PrivateGroupId, Received},
};
pub use transaction::{ActionOutcome, GroupAction, Intent, Transaction};
pub use transport::{Publisher, Recipient, SealError, Sealer, TransportError};
