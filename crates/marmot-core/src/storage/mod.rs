//! Persistence capability for groups and key packages.
//!
//! Traits are synchronous and object safe so a client can hold
//! `Arc<dyn GroupStore>` and swap backends without generics leaking into every
//! type. The record format is owned by the implementation; the in-memory
//! stores keep CBOR bytes to exercise the same encode/decode path a database
//! backend would.
//!
//! The MLS engine keeps its own secrets (ratchet tree, epoch secrets, private
//! key package halves) in the provider's storage. A [`GroupRecord`] is the
//! Marmot view that sits next to it: suite id, epoch, members and group data.

mod error;
mod memory;

pub use error::StorageError;
pub use memory::{MemoryGroupStore, MemoryKeyPackageStore};
use serde::{Deserialize, Serialize};

use crate::mls::PrivateGroupId;

/// One member as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Leaf index in the ratchet tree
    pub leaf_index: u32,
    /// Identity key from the basic credential
    pub identity: Vec<u8>,
    /// Leaf signature public key
    pub signature_key: Vec<u8>,
}

/// Persisted state of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Private MLS group id
    pub group_id: PrivateGroupId,
    /// Cipher suite id declared by the group context
    pub cipher_suite: u16,
    /// Epoch at the time of writing
    pub epoch: u64,
    /// Identity of the founding member, when known
    pub creator: Option<[u8; 32]>,
    /// Members ordered by leaf index
    pub members: Vec<MemberRecord>,
    /// Encoded Marmot group data extension
    pub group_data: Vec<u8>,
    /// Wall clock seconds of the last write
    pub updated_at: u64,
}

/// A published key package whose private half lives in engine storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyPackage {
    /// Key package hash reference (engine storage key)
    pub hash_ref: Vec<u8>,
    /// TLS-serialized public key package
    pub key_package: Vec<u8>,
    /// Cipher suite id
    pub cipher_suite: u16,
    /// Wall clock seconds at creation
    pub created_at: u64,
}

/// Store for group records.
pub trait GroupStore: Send + Sync + 'static {
    /// Insert or replace the record for `record.group_id`.
    fn add(&self, record: &GroupRecord) -> Result<(), StorageError>;

    /// Record for `group_id`, or `None` if unknown.
    fn get(&self, group_id: &PrivateGroupId) -> Result<Option<GroupRecord>, StorageError>;

    /// Delete the record. Returns whether it existed.
    fn remove(&self, group_id: &PrivateGroupId) -> Result<bool, StorageError>;

    /// Ids of all stored groups. Order is not guaranteed.
    fn list(&self) -> Result<Vec<PrivateGroupId>, StorageError>;
}

/// Store for this client's own key packages.
pub trait KeyPackageStore: Send + Sync + 'static {
    /// Insert or replace by hash reference.
    fn add(&self, key_package: &StoredKeyPackage) -> Result<(), StorageError>;

    /// Key package with `hash_ref`, or `None`.
    fn get(&self, hash_ref: &[u8]) -> Result<Option<StoredKeyPackage>, StorageError>;

    /// Delete by hash reference. Returns whether it existed.
    fn remove(&self, hash_ref: &[u8]) -> Result<bool, StorageError>;

    /// All stored key packages. Order is not guaranteed.
    fn list(&self) -> Result<Vec<StoredKeyPackage>, StorageError>;
}
