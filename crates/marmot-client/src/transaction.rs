//! Group action transaction.
//!
//! Every local change to a group goes through [`Transaction::run`], which
//! publishes before it commits:
//!
//! 1. Policy checks: the group must have relays, the commit policy must allow
//!    the action. Nothing is staged if either fails.
//! 2. Stage the change in the state machine. The engine holds it as pending;
//!    the committed state is untouched.
//! 3. Seal the handshake or application message as a kind-445 event and
//!    publish it to the group relays.
//! 4. Publication failed: abandon the staged change and return the transport
//!    error. The group is byte for byte what it was before.
//! 5. Publication succeeded: confirm the change, send each invitee the
//!    Welcome, persist the new group record.
//!
//! A published message cannot be recalled, so once step 5 starts the change
//! is final. Welcome delivery failures are reported in the outcome, not
//! raised.

use marmot_core::{
    Environment, GroupError,
    mls::{
        GroupDataPatch, GroupStateMachine, GroupView, IdentityKey, KeyPackageSource,
        OutgoingKind, Proposal, Staged, proposals,
    },
    storage::GroupStore,
};
use marmot_proto::Event;
use openmls_traits::OpenMlsProvider;

use crate::{
    ClientError, CommitPolicy, policy,
    transport::{Publisher, Recipient, Sealer},
};

/// A change to propose without committing it.
#[derive(Debug, Clone)]
pub enum Intent {
    /// Propose adding the owner of a key package
    Invite(KeyPackageSource),
    /// Propose removing the member at a leaf
    Remove {
        /// Leaf index of the member
        leaf_index: u32,
    },
    /// Propose a group data change
    UpdateMetadata(GroupDataPatch),
}

impl Intent {
    fn build<E: Environment>(self, machine: &GroupStateMachine<E>) -> Result<Proposal, GroupError> {
        match self {
            Self::Invite(source) => {
                proposals::invite(machine.view(), machine.provider().crypto(), source)
            },
            Self::Remove { leaf_index } => proposals::remove(machine.view(), leaf_index),
            Self::UpdateMetadata(patch) => proposals::update_metadata(machine.view(), &patch),
        }
    }
}

/// Application-level change to one group.
#[derive(Debug, Clone)]
pub enum GroupAction {
    /// Add members and commit in one step
    Invite(Vec<KeyPackageSource>),
    /// Remove a member and commit
    Remove {
        /// Leaf index of the member
        leaf_index: u32,
    },
    /// Patch the group data and commit
    UpdateMetadata(GroupDataPatch),
    /// Publish a proposal for someone else to commit; the epoch stays
    ProposeOnly(Intent),
    /// Commit whatever proposals are pending (a key update if none are)
    Commit,
    /// Send an application message
    SendMessage(Vec<u8>),
}

impl GroupAction {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Invite(_) => "invite",
            Self::Remove { .. } => "remove",
            Self::UpdateMetadata(_) => "update metadata",
            Self::ProposeOnly(_) => "propose",
            Self::Commit => "commit",
            Self::SendMessage(_) => "send message",
        }
    }
}

/// Result of a completed action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// What was published
    pub kind: OutgoingKind,
    /// The sealed group event as published
    pub event: Event,
    /// Group view after the action
    pub view: GroupView,
    /// Invitees whose Welcome was published
    pub welcomed: Vec<IdentityKey>,
    /// Invitees whose Welcome could not be sealed or published
    pub undelivered_welcomes: Vec<IdentityKey>,
}

/// Collaborators one action needs.
#[derive(Clone, Copy)]
pub struct Transaction<'a> {
    /// Relay publication
    pub publisher: &'a dyn Publisher,
    /// Event wrapping
    pub sealer: &'a dyn Sealer,
    /// Where the group record is persisted after a commit
    pub store: &'a dyn GroupStore,
    /// Admin enforcement
    pub policy: CommitPolicy,
}

impl Transaction<'_> {
    /// Run `action` against `machine`, publishing before committing.
    ///
    /// # Errors
    ///
    /// - `ClientError::NoGroupRelays` if the group data lists no relays
    /// - `ClientError::NotAdmin` if the commit policy refuses the action
    /// - `ClientError::Group` if the proposal or commit cannot be built
    /// - `ClientError::Seal` / `ClientError::Transport` if the message could
    ///   not be published; the staged change is discarded
    /// - `ClientError::Persist` if the change went out but the store write
    ///   failed
    pub async fn run<E: Environment>(
        &self,
        action: GroupAction,
        machine: &mut GroupStateMachine<E>,
    ) -> Result<ActionOutcome, ClientError> {
        let relays = machine.view().group_data.relays.clone();
        if relays.is_empty() {
            return Err(ClientError::NoGroupRelays);
        }
        policy::check_local(self.policy, &action, machine)?;

        let name = action.name();
        let group_id = hex::encode(machine.group_id());
        let transport_group_id = machine.transport_group_id();
        let created_at = machine.provider().env().wall_clock_secs();

        let staged = stage(action, machine)?;
        let outgoing = staged.outgoing().clone();

        let rumor = Event::group_event(&transport_group_id, created_at, &outgoing.message);
        let event = self.sealer.seal(&rumor, &Recipient::Group(transport_group_id))?;

        if let Err(err) = self.publisher.publish(&event, &relays).await {
            tracing::warn!(
                group = %group_id,
                epoch = outgoing.epoch,
                action = name,
                error = %err,
                "publish failed, discarding staged change"
            );
            staged.abandon();
            return Err(err.into());
        }

        let view = staged.confirm()?;
        tracing::debug!(group = %group_id, epoch = view.epoch, action = name, "action published");

        let mut outcome = ActionOutcome {
            kind: outgoing.kind,
            event,
            view,
            welcomed: Vec::new(),
            undelivered_welcomes: Vec::new(),
        };

        if let Some(welcome) = &outgoing.welcome {
            let rumor = Event::welcome(created_at, welcome, &relays);
            for invitee in &outgoing.invitees {
                match self.deliver(&rumor, invitee, &relays).await {
                    Ok(()) => outcome.welcomed.push(*invitee),
                    Err(err) => {
                        tracing::warn!(
                            group = %group_id,
                            epoch = outcome.view.epoch,
                            invitee = %hex::encode(invitee),
                            error = %err,
                            "welcome not delivered"
                        );
                        outcome.undelivered_welcomes.push(*invitee);
                    },
                }
            }
        }

        if outcome.kind == OutgoingKind::Commit {
            let record = machine.record(created_at)?;
            self.store
                .add(&record)
                .map_err(|source| ClientError::Persist { epoch: record.epoch, source })?;
        }

        Ok(outcome)
    }

    async fn deliver(
        &self,
        rumor: &Event,
        invitee: &IdentityKey,
        relays: &[String],
    ) -> Result<(), ClientError> {
        let sealed = self.sealer.seal(rumor, &Recipient::Member(*invitee))?;
        self.publisher.publish(&sealed, relays).await?;
        Ok(())
    }
}

fn stage<E: Environment>(
    action: GroupAction,
    machine: &mut GroupStateMachine<E>,
) -> Result<Staged<'_, E>, GroupError> {
    match action {
        GroupAction::Invite(sources) => {
            let invites = sources
                .into_iter()
                .map(|source| {
                    proposals::invite(machine.view(), machine.provider().crypto(), source)
                })
                .collect::<Result<Vec<_>, _>>()?;
            machine.stage_commit(invites)
        },
        GroupAction::Remove { leaf_index } => {
            let proposal = proposals::remove(machine.view(), leaf_index)?;
            machine.stage_commit(vec![proposal])
        },
        GroupAction::UpdateMetadata(patch) => {
            let proposal = proposals::update_metadata(machine.view(), &patch)?;
            machine.stage_commit(vec![proposal])
        },
        GroupAction::ProposeOnly(intent) => {
            let proposal = intent.build(machine)?;
            machine.propose(proposal)
        },
        GroupAction::Commit => machine.stage_commit(Vec::new()),
        GroupAction::SendMessage(plaintext) => machine.create_message(&plaintext),
    }
}
