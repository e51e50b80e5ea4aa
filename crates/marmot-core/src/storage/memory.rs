#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Serialize, de::DeserializeOwned};

use super::{GroupRecord, GroupStore, KeyPackageStore, StorageError, StoredKeyPackage};
use crate::mls::PrivateGroupId;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// In-memory group store for tests and single-process clients.
///
/// Records are kept CBOR-encoded, so every `add`/`get` pair goes through the
/// same serialization a persistent backend would use. Clones share state.
///
/// Uses `lock().expect()`, which panics if the mutex is poisoned. Acceptable
/// for test and simulation code.
#[derive(Clone, Default)]
pub struct MemoryGroupStore {
    inner: Arc<Mutex<HashMap<PrivateGroupId, Vec<u8>>>>,
}

impl MemoryGroupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored groups.
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").len()
    }

    /// Whether the store holds no groups.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GroupStore for MemoryGroupStore {
    #[allow(clippy::expect_used)]
    fn add(&self, record: &GroupRecord) -> Result<(), StorageError> {
        let bytes = encode(record)?;
        self.inner.lock().expect("Mutex poisoned").insert(record.group_id, bytes);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn get(&self, group_id: &PrivateGroupId) -> Result<Option<GroupRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.get(group_id).map(|bytes| decode(bytes)).transpose()
    }

    #[allow(clippy::expect_used)]
    fn remove(&self, group_id: &PrivateGroupId) -> Result<bool, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").remove(group_id).is_some())
    }

    #[allow(clippy::expect_used)]
    fn list(&self) -> Result<Vec<PrivateGroupId>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").keys().copied().collect())
    }
}

/// In-memory key package store.
///
/// Same conventions as [`MemoryGroupStore`]: CBOR records, shared clones,
/// panics on a poisoned mutex.
#[derive(Clone, Default)]
pub struct MemoryKeyPackageStore {
    inner: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKeyPackageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyPackageStore for MemoryKeyPackageStore {
    #[allow(clippy::expect_used)]
    fn add(&self, key_package: &StoredKeyPackage) -> Result<(), StorageError> {
        let bytes = encode(key_package)?;
        self.inner.lock().expect("Mutex poisoned").insert(key_package.hash_ref.clone(), bytes);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn get(&self, hash_ref: &[u8]) -> Result<Option<StoredKeyPackage>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.get(hash_ref).map(|bytes| decode(bytes)).transpose()
    }

    #[allow(clippy::expect_used)]
    fn remove(&self, hash_ref: &[u8]) -> Result<bool, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").remove(hash_ref).is_some())
    }

    #[allow(clippy::expect_used)]
    fn list(&self) -> Result<Vec<StoredKeyPackage>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.values().map(|bytes| decode(bytes)).collect()
    }
}
