//! Client configuration.

use serde::{Deserialize, Serialize};

/// Who may commit changes to a group.
///
/// The group state machine only checks MLS validity. Admin policy is applied
/// here, before local commits are staged and before incoming commits are
/// merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Only members listed in the group data's admin keys may commit changes.
    /// Any member may still commit when the commit adds, removes and renames
    /// nothing (a plain key update).
    #[default]
    AdminsOnly,
    /// Any member may commit anything the MLS engine accepts.
    AnyMember,
}

/// Client settings.
///
/// Every field has a default, so a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Value of the `client` tag on published key packages
    pub client_name: String,

    /// MLS cipher suite id for new key packages and groups
    pub cipher_suite: u16,

    /// Relays used when a group or key package names none
    pub default_relays: Vec<String>,

    /// Admin enforcement for commits
    pub commit_policy: CommitPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "marmot".to_string(),
            cipher_suite: 0x0001,
            default_relays: Vec::new(),
            commit_policy: CommitPolicy::AdminsOnly,
        }
    }
}

impl ClientConfig {
    /// `relays` if non-empty, else the configured defaults.
    pub fn relays_or_default(&self, relays: &[String]) -> Vec<String> {
        if relays.is_empty() { self.default_relays.clone() } else { relays.to_vec() }
    }
}
