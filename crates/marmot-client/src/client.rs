//! Client registry.
//!
//! A [`Client`] is one local member's session: its signer, its MLS provider,
//! its stores and transport, and the set of groups it has open. It is the only
//! place that hands out [`GroupStateMachine`]s, and it hands out at most one
//! per group id.
//!
//! # Concurrency
//!
//! Each group id maps to a slot holding a [`OnceCell`]. The first caller for
//! an id loads the group from the store inside the cell; concurrent callers
//! wait on the same cell and receive the same instance. Every operation on a
//! group then runs under that group's [`Mutex`], so proposal building, commit
//! staging and state replacement for one group never interleave. Different
//! groups proceed independently.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use marmot_core::{
    Environment,
    mls::{
        GroupOptions, GroupStateMachine, LocalMember, MarmotProvider, PrivateGroupId, Received,
        key_package,
    },
    storage::{GroupStore, KeyPackageStore, StoredKeyPackage},
};
use marmot_proto::{Event, kind};
use openmls::prelude::Ciphersuite;
use tokio::sync::{Mutex, OnceCell};

use crate::{
    ActionOutcome, ClientConfig, ClientError, GroupAction, Transaction, policy,
    transport::{Publisher, Sealer},
};

/// A group owned by the registry, shared by every caller working on it.
pub type SharedGroup<E> = Arc<Mutex<GroupStateMachine<E>>>;

type Slot<E> = Arc<OnceCell<SharedGroup<E>>>;

/// External collaborators of a client.
#[derive(Clone)]
pub struct Backends {
    /// Group record persistence
    pub groups: Arc<dyn GroupStore>,
    /// Own key package persistence
    pub key_packages: Arc<dyn KeyPackageStore>,
    /// Relay publication
    pub publisher: Arc<dyn Publisher>,
    /// Event wrapping
    pub sealer: Arc<dyn Sealer>,
}

/// One member's Marmot session.
pub struct Client<E: Environment> {
    provider: Arc<MarmotProvider<E>>,
    local: LocalMember,
    config: ClientConfig,
    cipher_suite: Ciphersuite,
    backends: Backends,
    slots: Mutex<HashMap<PrivateGroupId, Slot<E>>>,
    closed: AtomicBool,
}

impl<E: Environment> Client<E> {
    /// Open a session.
    ///
    /// `provider` holds the engine state (group secrets, key package private
    /// halves) and must be the same one groups were created with for them to
    /// load.
    ///
    /// # Errors
    ///
    /// `GroupError::UnsupportedCipherSuite` if the configured suite is
    /// unknown to the provider.
    pub fn new(
        provider: Arc<MarmotProvider<E>>,
        local: LocalMember,
        config: ClientConfig,
        backends: Backends,
    ) -> Result<Self, ClientError> {
        let cipher_suite = provider.cipher_suite(config.cipher_suite)?;
        Ok(Self {
            provider,
            local,
            config,
            cipher_suite,
            backends,
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Our identity key.
    pub fn identity(&self) -> &[u8; 32] {
        &self.local.identity
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a group with this client as its only member and admin.
    ///
    /// Relays default to the configured ones when `options` names none. The
    /// group is persisted and registered before its id is returned.
    pub async fn create_group(
        &self,
        name: &str,
        mut options: GroupOptions,
    ) -> Result<PrivateGroupId, ClientError> {
        self.ensure_open()?;
        options.relays = self.config.relays_or_default(&options.relays);

        let own = key_package::generate(
            self.provider.as_ref(),
            &self.local.signer,
            &self.local.identity,
            self.cipher_suite,
            &[],
        )?;

        let machine = GroupStateMachine::create(
            self.provider.clone(),
            self.local.clone(),
            &own.key_package,
            name,
            options,
        )?;
        let group_id = machine.group_id();

        self.backends.groups.add(&machine.record(self.now())?)?;
        self.register(group_id, machine).await;

        Ok(group_id)
    }

    /// The group with `group_id`, loading it from the store on first use.
    ///
    /// Concurrent calls for the same id return the same instance.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownGroup` if the store has no record
    /// - `ClientError::Group` if the engine state does not match the record
    pub async fn group(&self, group_id: &PrivateGroupId) -> Result<SharedGroup<E>, ClientError> {
        self.ensure_open()?;

        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(*group_id).or_default().clone()
        };

        match slot.get_or_try_init(|| async { self.load(group_id) }).await {
            Ok(group) => Ok(group.clone()),
            Err(err) => {
                // Drop the slot this call waited on, unless it was replaced or filled
                let mut slots = self.slots.lock().await;
                if slots.get(group_id).is_some_and(|s| Arc::ptr_eq(s, &slot) && !s.initialized()) {
                    slots.remove(group_id);
                }
                Err(err)
            },
        }
    }

    /// Number of groups registered, including ones still loading.
    pub async fn open_groups(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Ids of every group in the store.
    pub fn group_ids(&self) -> Result<Vec<PrivateGroupId>, ClientError> {
        Ok(self.backends.groups.list()?)
    }

    /// Run an action against a group.
    ///
    /// Holds the group's lock for the whole transaction, publication
    /// included.
    pub async fn run(
        &self,
        group_id: &PrivateGroupId,
        action: GroupAction,
    ) -> Result<ActionOutcome, ClientError> {
        let group = self.group(group_id).await?;
        let mut machine = group.lock().await;
        self.transaction().run(action, &mut machine).await
    }

    /// Generate a key package, keep it, and publish it as a kind-443 event.
    ///
    /// The key package is forgotten again if publication fails.
    pub async fn publish_key_package(&self, relays: &[String]) -> Result<Event, ClientError> {
        self.ensure_open()?;
        let relays = self.config.relays_or_default(relays);
        if relays.is_empty() {
            return Err(ClientError::NoKeyPackageRelays);
        }

        let complete = key_package::generate(
            self.provider.as_ref(),
            &self.local.signer,
            &self.local.identity,
            self.cipher_suite,
            &[],
        )?;

        let created_at = self.now();
        let stored = StoredKeyPackage {
            hash_ref: complete.hash_ref.clone(),
            key_package: complete.serialized.clone(),
            cipher_suite: self.config.cipher_suite,
            created_at,
        };
        self.backends.key_packages.add(&stored)?;

        let event = key_package::to_event(&complete, &self.config.client_name, &relays, created_at);
        if let Err(err) = self.backends.publisher.publish(&event, &relays).await {
            if let Err(e) = self.backends.key_packages.remove(&stored.hash_ref) {
                tracing::warn!(error = %e, "failed to forget unpublished key package");
            }
            return Err(err.into());
        }

        tracing::debug!(hash_ref = %hex::encode(&stored.hash_ref), "published key package");
        Ok(event)
    }

    /// Join a group from a sealed Welcome addressed to us.
    ///
    /// The joined group is persisted and replaces any instance registered for
    /// the same id, such as one we were removed from earlier. A Welcome for a
    /// group we are still active in is refused. The key package the Welcome
    /// consumed is dropped from the key package store.
    pub async fn join_from_welcome(&self, sealed: &Event) -> Result<PrivateGroupId, ClientError> {
        self.ensure_open()?;

        let welcome = self.backends.sealer.open(sealed)?;
        welcome.ensure_kind(kind::WELCOME)?;
        let payload = welcome.payload()?;

        let machine = GroupStateMachine::join_from_welcome(
            self.provider.clone(),
            self.local.clone(),
            &payload,
        )?;
        let group_id = machine.group_id();

        self.backends.groups.add(&machine.record(self.now())?)?;
        self.register(group_id, machine).await;
        self.forget_consumed_key_packages(&payload);

        Ok(group_id)
    }

    /// Feed a sealed group event from a relay into its group.
    ///
    /// Incoming commits are checked against the commit policy before they are
    /// merged, and the group record is rewritten after each merged commit. A
    /// commit that removes us drops the group from the registry and the
    /// store.
    pub async fn ingest(
        &self,
        group_id: &PrivateGroupId,
        sealed: &Event,
    ) -> Result<Received, ClientError> {
        let group = self.group(group_id).await?;
        let mut machine = group.lock().await;

        let event = self.backends.sealer.open(sealed)?;
        event.ensure_kind(kind::GROUP_EVENT)?;

        let expected = machine.transport_group_id();
        let actual = event.transport_group_id()?;
        if actual != expected {
            return Err(ClientError::WrongGroup {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }

        let authorize = policy::incoming_commits(
            self.config.commit_policy,
            machine.view().group_data.admin_pubkeys.clone(),
        );
        let received = machine.receive(&event.payload()?, authorize)?;

        match &received {
            Received::Commit { view, .. } => {
                let record = machine.record(self.now())?;
                self.backends
                    .groups
                    .add(&record)
                    .map_err(|source| ClientError::Persist { epoch: view.epoch, source })?;
            },
            Received::Removed { .. } => {
                drop(machine);
                self.slots.lock().await.remove(group_id);
                self.backends.groups.remove(group_id)?;
            },
            Received::Application { .. } | Received::Proposal { .. } => {},
        }

        Ok(received)
    }

    /// Close the session.
    ///
    /// Drops every cached group. Callers still holding a [`SharedGroup`] keep
    /// it, but the client refuses further calls. State already persisted
    /// survives, and a new client over the same provider and stores loads it
    /// again.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let open = {
            let mut slots = self.slots.lock().await;
            let open = slots.len();
            slots.clear();
            open
        };
        tracing::info!(groups = open, "client closed");
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) { Err(ClientError::Closed) } else { Ok(()) }
    }

    fn transaction(&self) -> Transaction<'_> {
        Transaction {
            publisher: self.backends.publisher.as_ref(),
            sealer: self.backends.sealer.as_ref(),
            store: self.backends.groups.as_ref(),
            policy: self.config.commit_policy,
        }
    }

    fn load(&self, group_id: &PrivateGroupId) -> Result<SharedGroup<E>, ClientError> {
        let record = self
            .backends
            .groups
            .get(group_id)?
            .ok_or_else(|| ClientError::UnknownGroup { group_id: hex::encode(group_id) })?;

        let machine = GroupStateMachine::load(self.provider.clone(), self.local.clone(), &record)?;
        Ok(Arc::new(Mutex::new(machine)))
    }

    async fn register(&self, group_id: PrivateGroupId, machine: GroupStateMachine<E>) {
        let slot = Arc::new(OnceCell::from(Arc::new(Mutex::new(machine))));
        let displaced = self.slots.lock().await.insert(group_id, slot);
        if displaced.is_some_and(|old| old.initialized()) {
            tracing::info!(group = %hex::encode(group_id), "replaced open group instance");
        }
    }

    fn forget_consumed_key_packages(&self, welcome: &[u8]) {
        let recipients = match key_package::welcome_recipients(welcome) {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read welcome recipients");
                return;
            },
        };

        for hash_ref in recipients {
            match self.backends.key_packages.remove(&hash_ref) {
                Ok(true) => {
                    tracing::debug!(hash_ref = %hex::encode(&hash_ref), "forgot used key package");
                },
                Ok(false) => {},
                Err(e) => tracing::warn!(error = %e, "failed to forget used key package"),
            }
        }
    }

    fn now(&self) -> u64 {
        self.provider.env().wall_clock_secs()
    }
}
