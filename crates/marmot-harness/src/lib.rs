//! Deterministic simulation harness for Marmot client testing.
//!
//! In-memory implementations of the Environment, Publisher and Sealer
//! capabilities, so whole group lifecycles run in one process with a seeded
//! RNG and injected relay faults.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks what must hold whenever members look at
//! the same group: members at the same epoch agree on secrets, roster and
//! group data. Use [`InvariantRegistry::standard()`] after every step of a
//! scenario.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod plain_sealer;
pub mod sim_env;
pub mod sim_relay;

pub use cluster::{RELAY_URL, SimCluster, SimMember, sim_config};
pub use invariants::{
    EpochAgreement, GroupDataAgreement, Invariant, InvariantRegistry, InvariantResult,
    MembershipConsistency, Violation,
};
pub use plain_sealer::PlainSealer;
pub use sim_env::SimEnv;
pub use sim_relay::{Fault, Published, SimRelay};
