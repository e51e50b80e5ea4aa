//! Admin enforcement for commits.
//!
//! Under [`CommitPolicy::AdminsOnly`] a commit that adds, removes or changes
//! group data must come from a member listed in the group data's admin keys,
//! as of the epoch the commit was made in. Commits that change none of those
//! (key updates) are open to every member. Proposals and application
//! messages are never restricted.

use marmot_core::{
    Environment, GroupError,
    mls::{CommitSummary, GroupStateMachine, IdentityKey},
};

use crate::{ClientError, CommitPolicy, GroupAction};

/// Refuse local actions the policy does not allow this member to take.
pub(crate) fn check_local<E: Environment>(
    policy: CommitPolicy,
    action: &GroupAction,
    machine: &GroupStateMachine<E>,
) -> Result<(), ClientError> {
    if policy == CommitPolicy::AnyMember {
        return Ok(());
    }

    let changes_group = match action {
        GroupAction::Invite(_) | GroupAction::Remove { .. } | GroupAction::UpdateMetadata(_) => {
            true
        },
        GroupAction::Commit => machine.pending_proposal_count() > 0,
        GroupAction::ProposeOnly(_) | GroupAction::SendMessage(_) => false,
    };

    if changes_group && !machine.view().is_admin(machine.own_identity()) {
        return Err(ClientError::NotAdmin { action: action.name() });
    }
    Ok(())
}

/// Authorizer for incoming commits, judged against the current `admins`.
pub(crate) fn incoming_commits(
    policy: CommitPolicy,
    admins: Vec<IdentityKey>,
) -> impl FnOnce(&CommitSummary) -> Result<(), GroupError> {
    move |summary| {
        if policy == CommitPolicy::AnyMember || is_key_update(summary) {
            return Ok(());
        }
        if admins.iter().any(|admin| admin.as_slice() == summary.committer.as_slice()) {
            return Ok(());
        }
        Err(GroupError::Unauthorized {
            reason: format!("{} is not an admin", hex::encode(&summary.committer)),
        })
    }
}

fn is_key_update(summary: &CommitSummary) -> bool {
    summary.added.is_empty() && summary.removed.is_empty() && !summary.metadata_changed
}
