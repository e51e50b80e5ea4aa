//! `OpenMLS` provider wired to the Marmot environment.
//!
//! The provider is the MLS engine capability: crypto, randomness and engine
//! storage. Randomness comes from [`Environment`], so simulations with a seeded
//! environment produce identical keys and group ids across runs.

use openmls::prelude::Ciphersuite;
use openmls_memory_storage::MemoryStorage;
use openmls_rust_crypto::RustCrypto;
use openmls_traits::{OpenMlsProvider, crypto::OpenMlsCrypto, random::OpenMlsRand};

use crate::{GroupError, env::Environment};

/// Marmot's `OpenMLS` provider.
///
/// One provider is shared (behind an `Arc`) by every group of a client. The
/// engine keeps private key material, proposal stores and pending commits in
/// `storage`, keyed by group id, so groups never see each other's state.
pub struct MarmotProvider<E: Environment> {
    crypto: RustCrypto,
    rand: EnvironmentRng<E>,
    storage: MemoryStorage,
    env: E,
}

impl<E: Environment> MarmotProvider<E> {
    /// Provider with in-memory engine storage and RNG from `env`.
    pub fn new(env: E) -> Self {
        Self {
            crypto: RustCrypto::default(),
            rand: EnvironmentRng { env: env.clone() },
            storage: MemoryStorage::default(),
            env,
        }
    }

    /// Environment the provider draws randomness from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Resolve a cipher suite id to an implementation this provider supports.
    ///
    /// Used when loading a persisted group, whose record declares its suite by
    /// numeric id.
    pub fn cipher_suite(&self, id: u16) -> Result<Ciphersuite, GroupError> {
        let suite =
            Ciphersuite::try_from(id).map_err(|_| GroupError::UnsupportedCipherSuite(id))?;
        self.crypto.supports(suite).map_err(|_| GroupError::UnsupportedCipherSuite(id))?;
        Ok(suite)
    }
}

/// RNG adapter that delegates to the environment.
pub struct EnvironmentRng<E: Environment> {
    env: E,
}

impl<E: Environment> OpenMlsRand for EnvironmentRng<E> {
    type Error = std::convert::Infallible;

    fn random_array<const N: usize>(&self) -> Result<[u8; N], Self::Error> {
        let mut bytes = [0u8; N];
        self.env.random_bytes(&mut bytes);
        Ok(bytes)
    }

    fn random_vec(&self, len: usize) -> Result<Vec<u8>, Self::Error> {
        let mut bytes = vec![0u8; len];
        self.env.random_bytes(&mut bytes);
        Ok(bytes)
    }
}

impl<E: Environment> OpenMlsProvider for MarmotProvider<E> {
    type CryptoProvider = RustCrypto;
    type RandProvider = EnvironmentRng<E>;
    type StorageProvider = MemoryStorage;

    fn crypto(&self) -> &Self::CryptoProvider {
        &self.crypto
    }

    fn rand(&self) -> &Self::RandProvider {
        &self.rand
    }

    fn storage(&self) -> &Self::StorageProvider {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SystemEnv, mls::constants::DEFAULT_CIPHERSUITE};

    #[test]
    fn resolves_default_suite() {
        let provider = MarmotProvider::new(SystemEnv);
        assert_eq!(provider.cipher_suite(DEFAULT_CIPHERSUITE as u16), Ok(DEFAULT_CIPHERSUITE));
    }

    #[test]
    fn rejects_unknown_suite_id() {
        let provider = MarmotProvider::new(SystemEnv);
        assert_eq!(provider.cipher_suite(0x7777), Err(GroupError::UnsupportedCipherSuite(0x7777)));
    }

    #[test]
    fn rng_fills_requested_length() {
        let provider = MarmotProvider::new(SystemEnv);
        let bytes = provider.rand().random_vec(48).expect("infallible");
        assert_eq!(bytes.len(), 48);
    }
}
