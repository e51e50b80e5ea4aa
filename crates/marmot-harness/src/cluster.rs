//! Simulated members sharing one relay.
//!
//! A [`SimCluster`] wires several [`Client`]s to one [`SimEnv`] and one
//! [`SimRelay`], each with its own MLS provider, stores and [`PlainSealer`].
//! Members only learn about each other's changes by reading the relay, the
//! same way real clients do.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use marmot_client::{
    ActionOutcome, Backends, Client, ClientConfig, ClientError, GroupAction, Received,
};
use marmot_core::{
    mls::{
        DEFAULT_CIPHERSUITE, GroupView, IdentityKey, LocalMember, MarmotProvider, PrivateGroupId,
    },
    storage::{MemoryGroupStore, MemoryKeyPackageStore},
};

use crate::{PlainSealer, SimEnv, SimRelay};

/// Relay URL every simulated member publishes to.
pub const RELAY_URL: &str = "wss://relay.sim";

/// Configuration with [`RELAY_URL`] as the default relay.
pub fn sim_config() -> ClientConfig {
    ClientConfig {
        client_name: "marmot-sim".to_string(),
        default_relays: vec![RELAY_URL.to_string()],
        ..ClientConfig::default()
    }
}

/// One simulated member.
pub struct SimMember {
    /// Identity key
    pub identity: IdentityKey,
    /// The member's client
    pub client: Client<SimEnv>,
    /// Group store, for inspection
    pub groups: MemoryGroupStore,
    /// Key package store, for inspection
    pub key_packages: MemoryKeyPackageStore,
    provider: Arc<MarmotProvider<SimEnv>>,
    local: LocalMember,
    config: ClientConfig,
    relay: SimRelay,
    own_events: Mutex<HashSet<String>>,
    cursors: Mutex<HashMap<[u8; 32], usize>>,
}

impl SimMember {
    /// Member with identity `identity` publishing to `relay`.
    pub fn new(
        env: &SimEnv,
        relay: &SimRelay,
        identity: IdentityKey,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let provider = Arc::new(MarmotProvider::new(env.clone()));
        let local = LocalMember::generate(identity, DEFAULT_CIPHERSUITE)?;
        let groups = MemoryGroupStore::new();
        let key_packages = MemoryKeyPackageStore::new();

        let client = Client::new(
            provider.clone(),
            local.clone(),
            config.clone(),
            backends(relay, identity, &groups, &key_packages),
        )?;

        Ok(Self {
            identity,
            client,
            groups,
            key_packages,
            provider,
            local,
            config,
            relay: relay.clone(),
            own_events: Mutex::new(HashSet::new()),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// A second client over the same provider and stores, as after a restart.
    pub fn reopen(&self) -> Result<Client<SimEnv>, ClientError> {
        Client::new(
            self.provider.clone(),
            self.local.clone(),
            self.config.clone(),
            backends(&self.relay, self.identity, &self.groups, &self.key_packages),
        )
    }

    /// Run an action and remember the published event as our own.
    #[allow(clippy::expect_used)]
    pub async fn run(
        &self,
        group_id: &PrivateGroupId,
        action: GroupAction,
    ) -> Result<ActionOutcome, ClientError> {
        let outcome = self.client.run(group_id, action).await?;
        self.own_events.lock().expect("Mutex poisoned").insert(outcome.event.content.clone());
        Ok(outcome)
    }

    /// Join from the most recent Welcome addressed to us, if there is one.
    ///
    /// Group events published before the join are skipped by later
    /// [`Self::catch_up`] calls.
    #[allow(clippy::expect_used)]
    pub async fn join_latest_welcome(&self) -> Result<Option<PrivateGroupId>, ClientError> {
        let Some(welcome) = self.relay.gift_wraps_for(&self.identity).pop() else {
            return Ok(None);
        };

        let group_id = self.client.join_from_welcome(&welcome).await?;

        let transport_group_id = self.view(&group_id).await?.group_data.transport_group_id;
        let seen = self.relay.group_events(&transport_group_id).len();
        self.cursors.lock().expect("Mutex poisoned").insert(transport_group_id, seen);

        Ok(Some(group_id))
    }

    /// Ingest every group event we have not seen yet, skipping our own.
    ///
    /// Returns one result per ingested event; failures do not stop the
    /// remaining events.
    #[allow(clippy::expect_used)]
    pub async fn catch_up(
        &self,
        group_id: &PrivateGroupId,
    ) -> Result<Vec<Result<Received, ClientError>>, ClientError> {
        let transport_group_id = self.view(group_id).await?.group_data.transport_group_id;
        let events = self.relay.group_events(&transport_group_id);

        let start = {
            let mut cursors = self.cursors.lock().expect("Mutex poisoned");
            let cursor = cursors.entry(transport_group_id).or_insert(0);
            let start = *cursor;
            *cursor = events.len();
            start
        };

        let mut results = Vec::new();
        for event in events.iter().skip(start) {
            let own = self.own_events.lock().expect("Mutex poisoned").contains(&event.content);
            if !own {
                results.push(self.client.ingest(group_id, event).await);
            }
        }
        Ok(results)
    }

    /// Current view of a group.
    pub async fn view(&self, group_id: &PrivateGroupId) -> Result<GroupView, ClientError> {
        let group = self.client.group(group_id).await?;
        let machine = group.lock().await;
        Ok(machine.view().clone())
    }
}

fn backends(
    relay: &SimRelay,
    identity: IdentityKey,
    groups: &MemoryGroupStore,
    key_packages: &MemoryKeyPackageStore,
) -> Backends {
    Backends {
        groups: Arc::new(groups.clone()),
        key_packages: Arc::new(key_packages.clone()),
        publisher: Arc::new(relay.clone()),
        sealer: Arc::new(PlainSealer::new(identity)),
    }
}

/// Members sharing one environment and one relay.
pub struct SimCluster {
    /// Shared environment
    pub env: SimEnv,
    /// Shared relay
    pub relay: SimRelay,
    /// Members; member `i` has identity `[i + 1; 32]`
    pub members: Vec<SimMember>,
}

impl SimCluster {
    /// Cluster of `size` members using [`sim_config`].
    pub fn new(seed: u64, size: usize) -> Result<Self, ClientError> {
        Self::with_config(seed, size, &sim_config())
    }

    /// Cluster of `size` members sharing `config`.
    pub fn with_config(seed: u64, size: usize, config: &ClientConfig) -> Result<Self, ClientError> {
        let env = SimEnv::with_seed(seed);
        let relay = SimRelay::new();
        let members = (0..size)
            .map(|i| SimMember::new(&env, &relay, [(i + 1) as u8; 32], config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { env, relay, members })
    }

    /// Views of `group_id` from every member that has it open.
    pub async fn views(&self, group_id: &PrivateGroupId) -> Vec<GroupView> {
        let mut views = Vec::new();
        for member in &self.members {
            if let Ok(view) = member.view(group_id).await {
                views.push(view);
            }
        }
        views
    }

    /// Let every member catch up on `group_id`.
    ///
    /// Returns each ingested event's result tagged with the member index.
    pub async fn sync(
        &self,
        group_id: &PrivateGroupId,
    ) -> Vec<(usize, Result<Received, ClientError>)> {
        let mut results = Vec::new();
        for (index, member) in self.members.iter().enumerate() {
            if let Ok(received) = member.catch_up(group_id).await {
                results.extend(received.into_iter().map(|r| (index, r)));
            }
        }
        results
    }
}
