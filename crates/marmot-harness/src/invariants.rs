//! Invariant checking across the members of one group.
//!
//! Invariants capture what must be true whenever members look at the same
//! group, regardless of which scenario got them there. Members at the same
//! epoch must have derived identical state from the same commits; any
//! difference means a commit was applied partially or differently.

use std::collections::BTreeMap;

use marmot_core::mls::GroupView;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of the views several members hold of one group.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against every member's view.
    fn check(&self, views: &[GroupView]) -> InvariantResult;
}

/// Members at the same epoch share the epoch authenticator and tree hash.
pub struct EpochAgreement;

impl Invariant for EpochAgreement {
    fn name(&self) -> &'static str {
        "epoch_agreement"
    }

    fn check(&self, views: &[GroupView]) -> InvariantResult {
        for (epoch, group) in by_epoch(views) {
            let first = group[0];
            for view in &group[1..] {
                if view.epoch_authenticator != first.epoch_authenticator
                    || view.tree_hash != first.tree_hash
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "epoch {epoch}: leaf {} and leaf {} derived different secrets",
                            first.own_leaf_index, view.own_leaf_index
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Members at the same epoch see the same identities at the same leaves.
pub struct MembershipConsistency;

impl Invariant for MembershipConsistency {
    fn name(&self) -> &'static str {
        "membership_consistency"
    }

    fn check(&self, views: &[GroupView]) -> InvariantResult {
        for (epoch, group) in by_epoch(views) {
            let roster = |view: &GroupView| {
                view.members.iter().map(|m| (m.leaf_index, m.identity.clone())).collect::<Vec<_>>()
            };
            let expected = roster(group[0]);
            for view in &group[1..] {
                let actual = roster(view);
                if actual != expected {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "epoch {epoch}: leaf {} sees {} members, leaf {} sees {}",
                            group[0].own_leaf_index,
                            expected.len(),
                            view.own_leaf_index,
                            actual.len()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Members at the same epoch hold identical group data.
pub struct GroupDataAgreement;

impl Invariant for GroupDataAgreement {
    fn name(&self) -> &'static str {
        "group_data_agreement"
    }

    fn check(&self, views: &[GroupView]) -> InvariantResult {
        for (epoch, group) in by_epoch(views) {
            for view in &group[1..] {
                if view.group_data != group[0].group_data {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "epoch {epoch}: leaf {} has group name {:?}, leaf {} has {:?}",
                            group[0].own_leaf_index,
                            group[0].group_data.name,
                            view.own_leaf_index,
                            view.group_data.name
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

fn by_epoch(views: &[GroupView]) -> BTreeMap<u64, Vec<&GroupView>> {
    let mut groups: BTreeMap<u64, Vec<&GroupView>> = BTreeMap::new();
    for view in views {
        groups.entry(view.epoch).or_default().push(view);
    }
    groups
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every invariant in this module.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(EpochAgreement);
        registry.add(MembershipConsistency);
        registry.add(GroupDataAgreement);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, views: &[GroupView]) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(views).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, views: &[GroupView], context: &str) {
        if let Err(violations) = self.check_all(views) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
