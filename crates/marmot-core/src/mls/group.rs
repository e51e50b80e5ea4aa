//! Per-group state machine.
//!
//! A [`GroupStateMachine`] owns one MLS group and is the only thing allowed to
//! change it. Local changes go through a [`Staged`] guard: the engine prepares
//! the handshake message, the caller publishes it, and only then does
//! [`Staged::confirm`] make the change authoritative. Dropping the guard
//! instead rolls the engine back, so a change that was never published never
//! happened.
//!
//! # Invariants
//!
//! - Epoch advances by exactly one per merged commit
//! - A rejected incoming commit leaves epoch, members and group data unchanged
//! - The group context always carries exactly one `0xF2EE` extension; commits
//!   that would drop it are refused before merging
//! - [`GroupView`] is re-derived from the engine after every transition, never
//!   patched

use std::sync::Arc;

use marmot_proto::{GroupData, MARMOT_GROUP_DATA_EXTENSION_TYPE};
use openmls::{ciphersuite::hash_ref::ProposalRef, prelude::*};
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::OpenMlsProvider;
use tls_codec::{Deserialize, Serialize};

use super::{
    constants::GROUP_DATA_EXTENSION,
    key_package,
    proposals::{Proposal, dedup},
    provider::MarmotProvider,
    view::{GroupView, IdentityKey, PrivateGroupId, group_data_from, identity_of},
};
use crate::{
    GroupError,
    env::Environment,
    storage::{GroupRecord, MemberRecord},
};

/// The local member's signing identity.
///
/// Shared by every group of a client.
#[derive(Clone)]
pub struct LocalMember {
    /// Marmot identity key carried in the basic credential
    pub identity: IdentityKey,
    /// Leaf signature key pair
    pub signer: Arc<SignatureKeyPair>,
}

impl LocalMember {
    /// Wrap an existing key pair.
    pub fn new(identity: IdentityKey, signer: SignatureKeyPair) -> Self {
        Self { identity, signer: Arc::new(signer) }
    }

    /// Generate a fresh signature key pair for `ciphersuite`.
    pub fn generate(identity: IdentityKey, ciphersuite: Ciphersuite) -> Result<Self, GroupError> {
        let signer = SignatureKeyPair::new(ciphersuite.signature_algorithm())
            .map_err(|e| GroupError::engine("generate signature key", e))?;
        Ok(Self::new(identity, signer))
    }
}

/// Settings for a new group beyond its name.
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    /// Free-form description
    pub description: String,
    /// Admins in addition to the creator, who is always an admin
    pub admins: Vec<IdentityKey>,
    /// Relays group events are published to
    pub relays: Vec<String>,
    /// Hash of the encrypted group image
    pub image_hash: [u8; 32],
    /// Group image key
    pub image_key: [u8; 32],
    /// Group image nonce
    pub image_nonce: [u8; 12],
}

/// What a staged handshake message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingKind {
    /// Proposal for review, epoch unchanged when confirmed
    Proposal,
    /// Commit, advances the epoch when confirmed
    Commit,
    /// Encrypted application message
    Application,
}

/// Message produced by a staged change, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Kind of message
    pub kind: OutgoingKind,
    /// TLS-serialized `MlsMessageOut`
    pub message: Vec<u8>,
    /// Welcome for members added by a commit
    pub welcome: Option<Vec<u8>>,
    /// Identities the welcome is addressed to
    pub invitees: Vec<IdentityKey>,
    /// Epoch the message was created in
    pub epoch: u64,
}

impl Outgoing {
    fn new(kind: OutgoingKind, epoch: u64) -> Self {
        Self { kind, message: Vec::new(), welcome: None, invitees: Vec::new(), epoch }
    }
}

/// What an incoming commit would change, shown to the caller's policy
/// before it is merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Identity of the committer
    pub committer: Vec<u8>,
    /// Epoch the commit creates
    pub epoch: u64,
    /// Identities being added
    pub added: Vec<Vec<u8>>,
    /// Leaf indices being removed
    pub removed: Vec<u32>,
    /// Group data after the commit
    pub group_data: GroupData,
    /// Whether the group data differs from the current epoch
    pub metadata_changed: bool,
    /// Whether the commit removes this client
    pub self_removed: bool,
}

/// Result of processing an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// Decrypted application message
    Application {
        /// Sender identity
        sender: Vec<u8>,
        /// Plaintext
        plaintext: Vec<u8>,
    },
    /// Proposal stored for a later commit
    Proposal {
        /// Sender identity
        sender: Vec<u8>,
    },
    /// Commit merged; the group is at a new epoch
    Commit {
        /// What the commit changed
        summary: CommitSummary,
        /// View at the new epoch
        view: GroupView,
    },
    /// Commit merged and it removed this client
    Removed {
        /// What the commit changed
        summary: CommitSummary,
    },
}

#[derive(Debug)]
enum PendingChange {
    Proposal(ProposalRef),
    Commit,
}

/// State machine for one Marmot group.
pub struct GroupStateMachine<E: Environment> {
    group: MlsGroup,
    provider: Arc<MarmotProvider<E>>,
    local: LocalMember,
    creator: Option<IdentityKey>,
    view: GroupView,
}

impl<E: Environment> GroupStateMachine<E> {
    /// Create a singleton group at epoch 0.
    ///
    /// `own_key_package` must belong to `local` and advertise group data
    /// support; its cipher suite and capabilities become the group's. The
    /// creator is always the first admin. The group context requires the
    /// `0xF2EE` capability from every future member.
    pub fn create(
        provider: Arc<MarmotProvider<E>>,
        local: LocalMember,
        own_key_package: &KeyPackage,
        name: &str,
        options: GroupOptions,
    ) -> Result<Self, GroupError> {
        key_package::require_group_support(own_key_package)?;

        let leaf = own_key_package.leaf_node();
        let identity = identity_of(leaf.credential())?;
        if identity != local.identity || leaf.signature_key().as_slice() != local.signer.public()
        {
            return Err(GroupError::InvalidIdentity {
                reason: "key package belongs to another member".to_string(),
            });
        }

        let env = provider.env();
        let group_id = env.random_id();

        let mut admins = vec![identity];
        admins.extend(options.admins);
        let group_data = GroupData {
            version: GroupData::CURRENT_VERSION,
            transport_group_id: env.random_id(),
            name: name.to_string(),
            description: options.description,
            admin_pubkeys: dedup(&admins),
            relays: options.relays,
            image_hash: options.image_hash,
            image_key: options.image_key,
            image_nonce: options.image_nonce,
        };

        let extensions = Extensions::from_vec(vec![
            Extension::Unknown(
                MARMOT_GROUP_DATA_EXTENSION_TYPE,
                UnknownExtension(group_data.encode()?),
            ),
            Extension::RequiredCapabilities(RequiredCapabilitiesExtension::new(
                &[GROUP_DATA_EXTENSION],
                &[],
                &[],
            )),
        ])
        .map_err(|e| GroupError::engine("build group context extensions", e))?;

        let credential_with_key = CredentialWithKey {
            credential: leaf.credential().clone(),
            signature_key: leaf.signature_key().clone(),
        };

        let group = MlsGroup::builder()
            .ciphersuite(own_key_package.ciphersuite())
            .with_group_id(GroupId::from_slice(&group_id))
            .use_ratchet_tree_extension(true)
            .with_capabilities(leaf.capabilities().clone())
            .with_group_context_extensions(extensions)
            .map_err(|e| GroupError::engine("set group context extensions", e))?
            .build(provider.as_ref(), local.signer.as_ref(), credential_with_key)
            .map_err(|e| GroupError::engine("create group", e))?;

        let machine = Self::assemble(group, provider, local, Some(identity))?;

        tracing::info!(
            group = %hex::encode(group_id),
            name = %machine.view.group_data.name,
            "created group"
        );

        Ok(machine)
    }

    /// Restore a group from engine storage.
    ///
    /// The record names the cipher suite by id; it is resolved through the
    /// provider and must match what the engine persisted.
    pub fn load(
        provider: Arc<MarmotProvider<E>>,
        local: LocalMember,
        record: &GroupRecord,
    ) -> Result<Self, GroupError> {
        let suite = provider.cipher_suite(record.cipher_suite)?;

        let group = MlsGroup::load(provider.storage(), &GroupId::from_slice(&record.group_id))
            .map_err(|e| GroupError::engine("load group", e))?
            .ok_or_else(|| GroupError::GroupNotFound { group_id: hex::encode(record.group_id) })?;

        if group.ciphersuite() != suite {
            return Err(GroupError::CipherSuiteMismatch {
                expected: record.cipher_suite,
                actual: group.ciphersuite() as u16,
            });
        }

        let own_leaf = group.own_leaf_node().ok_or(GroupError::Inactive)?;
        if own_leaf.signature_key().as_slice() != local.signer.public() {
            return Err(GroupError::SignerMismatch { group_id: hex::encode(record.group_id) });
        }

        let machine = Self::assemble(group, provider, local, record.creator)?;
        tracing::debug!(
            group = %hex::encode(record.group_id),
            epoch = machine.epoch(),
            "loaded group"
        );
        Ok(machine)
    }

    /// Join a group from a serialized Welcome.
    ///
    /// The private half of the key package the Welcome was built for must be
    /// in `provider`'s storage. The member at leaf 0 when we join is recorded
    /// as the creator; that leaf is never reassigned while the founder stays.
    /// A Welcome for a group we are still active in is refused with
    /// [`GroupError::AlreadyMember`] and leaves that group untouched.
    pub fn join_from_welcome(
        provider: Arc<MarmotProvider<E>>,
        local: LocalMember,
        welcome: &[u8],
    ) -> Result<Self, GroupError> {
        let message = MlsMessageIn::tls_deserialize_exact(welcome)
            .map_err(|e| GroupError::Serialization(format!("welcome: {e}")))?;

        let MlsMessageBodyIn::Welcome(welcome) = message.extract() else {
            return Err(GroupError::UnexpectedMessage {
                expected: "welcome",
                actual: "another message type".to_string(),
            });
        };

        let config = MlsGroupJoinConfig::builder().use_ratchet_tree_extension(true).build();
        let staged = StagedWelcome::new_from_welcome(provider.as_ref(), &config, welcome, None)
            .map_err(|e| GroupError::engine("stage welcome", e))?;

        // Joining overwrites the engine state stored under the group id
        let group_id = staged.group_context().group_id().clone();
        let existing = MlsGroup::load(provider.storage(), &group_id)
            .map_err(|e| GroupError::engine("load group", e))?;
        if existing.is_some_and(|group| group.is_active()) {
            return Err(GroupError::AlreadyMember { group_id: hex::encode(group_id.as_slice()) });
        }

        let mut group =
            staged.into_group(provider.as_ref()).map_err(|e| GroupError::engine("join group", e))?;

        if let Err(err) = group_data_from(group.export_group_context().extensions()) {
            if let Err(e) = group.delete(provider.storage()) {
                tracing::warn!(error = %e, "failed to delete rejected group");
            }
            return Err(err);
        }

        let creator = group
            .members()
            .find(|m| m.index.u32() == 0)
            .and_then(|m| identity_of(&m.credential).ok());

        let machine = Self::assemble(group, provider, local, creator)?;
        tracing::info!(
            group = %hex::encode(machine.view.group_id),
            epoch = machine.epoch(),
            members = machine.view.members.len(),
            "joined group from welcome"
        );
        Ok(machine)
    }

    fn assemble(
        group: MlsGroup,
        provider: Arc<MarmotProvider<E>>,
        local: LocalMember,
        creator: Option<IdentityKey>,
    ) -> Result<Self, GroupError> {
        let view = GroupView::derive(&group, creator.as_ref())?;
        Ok(Self { group, provider, local, creator, view })
    }

    /// Current committed view.
    pub fn view(&self) -> &GroupView {
        &self.view
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.group.epoch().as_u64()
    }

    /// Private group id.
    pub fn group_id(&self) -> PrivateGroupId {
        self.view.group_id
    }

    /// Transport group id from the group data.
    pub fn transport_group_id(&self) -> [u8; 32] {
        self.view.group_data.transport_group_id
    }

    /// Identity of the founding member, if known.
    pub fn creator(&self) -> Option<&IdentityKey> {
        self.creator.as_ref()
    }

    /// Our own identity.
    pub fn own_identity(&self) -> &IdentityKey {
        &self.local.identity
    }

    /// Provider shared with the rest of the client.
    pub fn provider(&self) -> &MarmotProvider<E> {
        &self.provider
    }

    /// Whether this client is still a member.
    pub fn is_active(&self) -> bool {
        self.group.is_active()
    }

    /// Number of proposals waiting for a commit.
    pub fn pending_proposal_count(&self) -> usize {
        self.group.pending_proposals().count()
    }

    /// Stage a proposal without committing it.
    ///
    /// When confirmed, the proposal sits in the proposal store until someone
    /// commits it; the epoch does not change.
    pub fn propose(&mut self, proposal: Proposal) -> Result<Staged<'_, E>, GroupError> {
        self.ensure_active()?;

        let provider = self.provider.as_ref();
        let signer = self.local.signer.as_ref();
        let kind = proposal.kind();

        let (message, proposal_ref) = match proposal {
            Proposal::Add(key_package) => {
                key_package::require_group_support(&key_package)?;
                self.group
                    .propose_add_member(provider, signer, &key_package)
                    .map_err(|e| GroupError::engine("propose add", e))?
            },
            Proposal::Remove(leaf_index) => {
                self.view.member(leaf_index).ok_or(GroupError::MemberNotFound(leaf_index))?;
                self.group
                    .propose_remove_member(provider, signer, LeafNodeIndex::new(leaf_index))
                    .map_err(|e| GroupError::engine("propose remove", e))?
            },
            Proposal::UpdateMetadata(extensions) => {
                group_data_from(&extensions)?;
                self.group
                    .propose_group_context_extensions(provider, extensions, signer)
                    .map_err(|e| GroupError::engine("propose context extensions", e))?
            },
        };

        tracing::debug!(
            group = %hex::encode(self.view.group_id),
            epoch = self.epoch(),
            kind,
            "staged proposal"
        );

        let epoch = self.epoch();
        let mut staged = Staged {
            machine: self,
            pending: Some(PendingChange::Proposal(proposal_ref)),
            outgoing: Outgoing::new(OutgoingKind::Proposal, epoch),
        };
        staged.outgoing.message = serialize(&message, "proposal")?;
        Ok(staged)
    }

    /// Stage a commit of the pending proposals plus `proposals`.
    ///
    /// Explicit proposals are inlined into the commit. At most one metadata
    /// update may be among them. When confirmed, the epoch advances by one.
    pub fn stage_commit(&mut self, proposals: Vec<Proposal>) -> Result<Staged<'_, E>, GroupError> {
        self.ensure_active()?;

        let mut adds = Vec::new();
        let mut removals = Vec::new();
        let mut context = None;
        for proposal in proposals {
            match proposal {
                Proposal::Add(key_package) => {
                    key_package::require_group_support(&key_package)?;
                    adds.push(key_package);
                },
                Proposal::Remove(leaf_index) => {
                    self.view.member(leaf_index).ok_or(GroupError::MemberNotFound(leaf_index))?;
                    let leaf = LeafNodeIndex::new(leaf_index);
                    if !removals.contains(&leaf) {
                        removals.push(leaf);
                    }
                },
                Proposal::UpdateMetadata(extensions) => {
                    group_data_from(&extensions)?;
                    if context.replace(extensions).is_some() {
                        return Err(GroupError::ConflictingProposals {
                            reason: "more than one metadata update in one commit".to_string(),
                        });
                    }
                },
            }
        }

        let provider = self.provider.as_ref();
        let signer = self.local.signer.as_ref();

        let mut builder = self
            .group
            .commit_builder()
            .consume_proposal_store(true)
            .propose_adds(adds)
            .propose_removals(removals);
        if let Some(extensions) = context {
            builder = builder.propose_group_context_extensions(extensions);
        }

        let bundle = builder
            .load_psks(provider.storage())
            .map_err(|e| GroupError::engine("load psks", e))?
            .build(provider.rand(), provider.crypto(), signer, |_| true)
            .map_err(|e| GroupError::engine("build commit", e))?
            .stage_commit(provider)
            .map_err(|e| GroupError::engine("stage commit", e))?;
        let (commit, welcome, _group_info) = bundle.into_messages();

        let epoch = self.epoch();
        let mut staged = Staged {
            machine: self,
            pending: Some(PendingChange::Commit),
            outgoing: Outgoing::new(OutgoingKind::Commit, epoch),
        };
        staged.outgoing.invitees = staged.check_pending_commit()?;
        staged.outgoing.message = serialize(&commit, "commit")?;
        staged.outgoing.welcome = welcome.map(|w| serialize(&w, "welcome")).transpose()?;

        tracing::debug!(
            group = %hex::encode(staged.machine.view.group_id),
            epoch,
            invitees = staged.outgoing.invitees.len(),
            "staged commit"
        );

        Ok(staged)
    }

    /// Encrypt an application message for the current epoch.
    pub fn create_message(&mut self, plaintext: &[u8]) -> Result<Staged<'_, E>, GroupError> {
        self.ensure_active()?;

        let message = self
            .group
            .create_message(self.provider.as_ref(), self.local.signer.as_ref(), plaintext)
            .map_err(|e| GroupError::engine("create message", e))?;

        let epoch = self.epoch();
        let mut outgoing = Outgoing::new(OutgoingKind::Application, epoch);
        outgoing.message = serialize(&message, "application message")?;
        Ok(Staged { machine: self, pending: None, outgoing })
    }

    /// Process a message from another member.
    ///
    /// Proposals are stored, application messages decrypted, commits checked
    /// and merged. Before a commit is merged, `authorize` sees its summary and
    /// may refuse it. Messages for any epoch but the current one are rejected
    /// before the engine sees them.
    pub fn receive(
        &mut self,
        message: &[u8],
        authorize: impl FnOnce(&CommitSummary) -> Result<(), GroupError>,
    ) -> Result<Received, GroupError> {
        self.ensure_active()?;
        let message = self.decode(message)?;
        self.process(message, authorize)
    }

    /// Apply a commit produced by another member.
    ///
    /// Same as [`Self::receive`] but refuses anything that is not a commit.
    /// Returns [`Received::Commit`] or [`Received::Removed`].
    pub fn apply_external_commit(
        &mut self,
        message: &[u8],
        authorize: impl FnOnce(&CommitSummary) -> Result<(), GroupError>,
    ) -> Result<Received, GroupError> {
        self.ensure_active()?;
        let message = self.decode(message)?;

        let content_type = message.content_type();
        if !matches!(content_type, ContentType::Commit) {
            return Err(GroupError::UnexpectedMessage {
                expected: "commit",
                actual: format!("{content_type:?}"),
            });
        }

        self.process(message, authorize)
    }

    /// Persisted form of the current state.
    pub fn record(&self, updated_at: u64) -> Result<GroupRecord, GroupError> {
        let view = &self.view;
        Ok(GroupRecord {
            group_id: view.group_id,
            cipher_suite: view.cipher_suite as u16,
            epoch: view.epoch,
            creator: self.creator,
            members: view
                .members
                .iter()
                .map(|m| MemberRecord {
                    leaf_index: m.leaf_index,
                    identity: m.identity.clone(),
                    signature_key: m.signature_key.clone(),
                })
                .collect(),
            group_data: view.group_data.encode()?,
            updated_at,
        })
    }

    fn ensure_active(&self) -> Result<(), GroupError> {
        if self.group.is_active() { Ok(()) } else { Err(GroupError::Inactive) }
    }

    fn decode(&self, bytes: &[u8]) -> Result<ProtocolMessage, GroupError> {
        let message = MlsMessageIn::tls_deserialize_exact(bytes)
            .map_err(|e| GroupError::Serialization(format!("mls message: {e}")))?;
        let message = message.try_into_protocol_message().map_err(|e| {
            GroupError::UnexpectedMessage { expected: "protocol message", actual: e.to_string() }
        })?;

        let current = self.epoch();
        let received = message.epoch().as_u64();
        if received != current {
            tracing::warn!(
                group = %hex::encode(self.view.group_id),
                current,
                received,
                "rejected message for another epoch"
            );
            return Err(GroupError::EpochMismatch { current, received });
        }

        Ok(message)
    }

    fn process(
        &mut self,
        message: ProtocolMessage,
        authorize: impl FnOnce(&CommitSummary) -> Result<(), GroupError>,
    ) -> Result<Received, GroupError> {
        let processed =
            self.group.process_message(self.provider.as_ref(), message).map_err(|e| {
                tracing::warn!(
                    group = %hex::encode(self.view.group_id),
                    epoch = self.view.epoch,
                    error = %e,
                    "engine rejected message"
                );
                GroupError::engine("process message", e)
            })?;

        let sender = processed.credential().serialized_content().to_vec();

        match processed.into_content() {
            ProcessedMessageContent::ApplicationMessage(message) => {
                Ok(Received::Application { sender, plaintext: message.into_bytes() })
            },
            ProcessedMessageContent::ProposalMessage(queued)
            | ProcessedMessageContent::ExternalJoinProposalMessage(queued) => {
                // Every later commit folds in the store; keep it free of
                // proposals that drop the group data
                if let openmls::prelude::Proposal::GroupContextExtensions(proposal) =
                    queued.proposal()
                    && let Err(err) = group_data_from(proposal.extensions())
                {
                    tracing::warn!(
                        group = %hex::encode(self.view.group_id),
                        epoch = self.view.epoch,
                        sender = %hex::encode(&sender),
                        error = %err,
                        "refused context extensions proposal"
                    );
                    return Err(err);
                }

                self.group
                    .store_pending_proposal(self.provider.storage(), *queued)
                    .map_err(|e| GroupError::engine("store proposal", e))?;
                tracing::debug!(
                    group = %hex::encode(self.view.group_id),
                    epoch = self.view.epoch,
                    "stored incoming proposal"
                );
                Ok(Received::Proposal { sender })
            },
            ProcessedMessageContent::StagedCommitMessage(staged) => {
                self.merge_incoming(sender, *staged, authorize)
            },
        }
    }

    fn merge_incoming(
        &mut self,
        committer: Vec<u8>,
        staged: StagedCommit,
        authorize: impl FnOnce(&CommitSummary) -> Result<(), GroupError>,
    ) -> Result<Received, GroupError> {
        let group_data = group_data_from(staged.group_context().extensions())?;

        let summary = CommitSummary {
            committer,
            epoch: self.view.epoch + 1,
            added: staged
                .add_proposals()
                .map(|p| {
                    let credential = p.add_proposal().key_package().leaf_node().credential();
                    credential.serialized_content().to_vec()
                })
                .collect(),
            removed: staged
                .remove_proposals()
                .map(|p| p.remove_proposal().removed().u32())
                .collect(),
            metadata_changed: group_data != self.view.group_data,
            group_data,
            self_removed: staged.self_removed(),
        };

        if let Err(err) = authorize(&summary) {
            tracing::warn!(
                group = %hex::encode(self.view.group_id),
                epoch = self.view.epoch,
                committer = %hex::encode(&summary.committer),
                error = %err,
                "refused incoming commit"
            );
            return Err(err);
        }

        self.group
            .merge_staged_commit(self.provider.as_ref(), staged)
            .map_err(|e| GroupError::engine("merge commit", e))?;

        if !self.group.is_active() {
            tracing::info!(group = %hex::encode(self.view.group_id), "removed from group");
            return Ok(Received::Removed { summary });
        }

        self.refresh()?;
        tracing::info!(
            group = %hex::encode(self.view.group_id),
            epoch = self.view.epoch,
            members = self.view.members.len(),
            "applied commit"
        );

        Ok(Received::Commit { summary, view: self.view.clone() })
    }

    fn refresh(&mut self) -> Result<(), GroupError> {
        let previous = self.view.epoch;
        self.view = GroupView::derive(&self.group, self.creator.as_ref())?;
        debug_assert!(
            self.view.epoch == previous || self.view.epoch == previous + 1,
            "invariant: epoch advances by at most one per transition ({previous} -> {})",
            self.view.epoch
        );
        Ok(())
    }

    fn rollback(&mut self, change: PendingChange) {
        let storage = self.provider.storage();
        let result = match change {
            PendingChange::Commit => self
                .group
                .clear_pending_commit(storage)
                .map_err(|e| GroupError::engine("clear pending commit", e)),
            PendingChange::Proposal(proposal_ref) => self
                .group
                .remove_pending_proposal(storage, &proposal_ref)
                .map_err(|e| GroupError::engine("remove pending proposal", e)),
        };

        match result {
            Ok(()) => tracing::debug!(
                group = %hex::encode(self.view.group_id),
                epoch = self.view.epoch,
                "rolled back staged change"
            ),
            Err(err) => tracing::warn!(
                group = %hex::encode(self.view.group_id),
                error = %err,
                "failed to roll back staged change"
            ),
        }
    }
}

/// A prepared local change that is not yet authoritative.
///
/// Holding it keeps the group borrowed, so nothing else can change the group
/// in between. [`Self::confirm`] after publishing; [`Self::abandon`] or drop
/// otherwise.
pub struct Staged<'g, E: Environment> {
    machine: &'g mut GroupStateMachine<E>,
    pending: Option<PendingChange>,
    outgoing: Outgoing,
}

impl<E: Environment> Staged<'_, E> {
    /// Message to publish.
    pub fn outgoing(&self) -> &Outgoing {
        &self.outgoing
    }

    /// Committed view, unchanged by the staged change.
    pub fn view(&self) -> &GroupView {
        &self.machine.view
    }

    /// Make the change authoritative and return the resulting view.
    pub fn confirm(mut self) -> Result<GroupView, GroupError> {
        if let Some(PendingChange::Commit) = self.pending.take() {
            let merged = self.machine.group.merge_pending_commit(self.machine.provider.as_ref());
            if let Err(e) = merged {
                self.machine.rollback(PendingChange::Commit);
                return Err(GroupError::engine("merge pending commit", e));
            }
            self.machine.refresh()?;
            tracing::info!(
                group = %hex::encode(self.machine.view.group_id),
                epoch = self.machine.view.epoch,
                members = self.machine.view.members.len(),
                "merged own commit"
            );
        }
        Ok(self.machine.view.clone())
    }

    /// Drop the change. The group is exactly as before it was staged.
    pub fn abandon(self) {}

    fn check_pending_commit(&self) -> Result<Vec<IdentityKey>, GroupError> {
        let staged = self.machine.group.pending_commit().ok_or_else(|| {
            GroupError::engine("inspect pending commit", "engine kept no pending commit")
        })?;

        group_data_from(staged.group_context().extensions())?;

        staged
            .add_proposals()
            .map(|p| identity_of(p.add_proposal().key_package().leaf_node().credential()))
            .collect()
    }
}

impl<E: Environment> Drop for Staged<'_, E> {
    fn drop(&mut self) {
        if let Some(change) = self.pending.take() {
            self.machine.rollback(change);
        }
    }
}

fn serialize(message: &MlsMessageOut, what: &str) -> Result<Vec<u8>, GroupError> {
    message.tls_serialize_detached().map_err(|e| GroupError::Serialization(format!("{what}: {e}")))
}
