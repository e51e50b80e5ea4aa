//! Materialized view of one group.
//!
//! A [`GroupView`] is always rebuilt from the engine's committed group context.
//! Nothing patches it incrementally, so it cannot drift from what the engine
//! (and every other member at the same epoch) considers authoritative.

use marmot_proto::{GroupData, MARMOT_GROUP_DATA_EXTENSION_TYPE};
use openmls::prelude::{Ciphersuite, Credential, Extension, Extensions, UnknownExtension};

use super::constants::IDENTITY_LEN;
use crate::GroupError;

/// Private MLS group identifier. Never published on relays.
pub type PrivateGroupId = [u8; 32];

/// Marmot identity public key.
pub type IdentityKey = [u8; IDENTITY_LEN];

/// One member of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Leaf index assigned by the engine; may be reused after removal
    pub leaf_index: u32,
    /// Identity bytes from the basic credential
    pub identity: Vec<u8>,
    /// Leaf signature public key
    pub signature_key: Vec<u8>,
    /// Whether this member founded the group
    pub is_creator: bool,
}

/// Snapshot of a group at one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    /// Private group id
    pub group_id: PrivateGroupId,
    /// Cipher suite of the group
    pub cipher_suite: Ciphersuite,
    /// Current epoch
    pub epoch: u64,
    /// Our own leaf
    pub own_leaf_index: u32,
    /// Members ordered by leaf index
    pub members: Vec<Member>,
    /// Decoded Marmot group data
    pub group_data: GroupData,
    /// Full group context extension set
    pub extensions: Extensions,
    /// Confirmed transcript hash of the current epoch
    pub confirmed_transcript_hash: Vec<u8>,
    /// Ratchet tree hash of the current epoch
    pub tree_hash: Vec<u8>,
    /// Epoch authenticator, equal across members at the same epoch
    pub epoch_authenticator: Vec<u8>,
}

impl GroupView {
    /// Rebuild the view from the engine's current committed state.
    pub(crate) fn derive(
        group: &openmls::group::MlsGroup,
        creator: Option<&IdentityKey>,
    ) -> Result<Self, GroupError> {
        let group_id = private_group_id(group.group_id().as_slice())?;
        let context = group.export_group_context();
        let extensions = context.extensions().clone();
        let group_data = group_data_from(&extensions)?;

        let members = group
            .members()
            .map(|m| {
                let identity = m.credential.serialized_content().to_vec();
                let is_creator = creator.is_some_and(|c| c.as_slice() == identity.as_slice());
                Member {
                    leaf_index: m.index.u32(),
                    identity,
                    signature_key: m.signature_key,
                    is_creator,
                }
            })
            .collect();

        Ok(Self {
            group_id,
            cipher_suite: group.ciphersuite(),
            epoch: group.epoch().as_u64(),
            own_leaf_index: group.own_leaf_index().u32(),
            members,
            group_data,
            extensions,
            confirmed_transcript_hash: context.confirmed_transcript_hash().to_vec(),
            tree_hash: context.tree_hash().to_vec(),
            epoch_authenticator: group.epoch_authenticator().as_slice().to_vec(),
        })
    }

    /// Member at `leaf_index`.
    pub fn member(&self, leaf_index: u32) -> Option<&Member> {
        self.members.iter().find(|m| m.leaf_index == leaf_index)
    }

    /// First member whose identity equals `identity`.
    pub fn member_by_identity(&self, identity: &[u8]) -> Option<&Member> {
        self.members.iter().find(|m| m.identity == identity)
    }

    /// Our own member entry.
    pub fn own_member(&self) -> Option<&Member> {
        self.member(self.own_leaf_index)
    }

    /// Whether `identity` is listed in the group data admins.
    pub fn is_admin(&self, identity: &[u8]) -> bool {
        self.group_data.is_admin(identity)
    }
}

/// Decode the Marmot group data from a group context extension set.
///
/// # Errors
///
/// - `GroupError::NoMarmotGroupData` if no `0xF2EE` extension is present
/// - `GroupError::Codec` if the extension bytes do not decode
pub fn group_data_from(extensions: &Extensions) -> Result<GroupData, GroupError> {
    let bytes = extensions
        .iter()
        .find_map(|ext| match ext {
            Extension::Unknown(ext_type, UnknownExtension(bytes))
                if *ext_type == MARMOT_GROUP_DATA_EXTENSION_TYPE =>
            {
                Some(bytes)
            },
            _ => None,
        })
        .ok_or(GroupError::NoMarmotGroupData)?;

    Ok(GroupData::decode(bytes)?)
}

/// Identity key carried by a basic credential.
pub fn identity_of(credential: &Credential) -> Result<IdentityKey, GroupError> {
    let content = credential.serialized_content();
    content.try_into().map_err(|_| GroupError::InvalidIdentity {
        reason: format!("expected {IDENTITY_LEN} byte identity, got {}", content.len()),
    })
}

pub(crate) fn private_group_id(bytes: &[u8]) -> Result<PrivateGroupId, GroupError> {
    bytes.try_into().map_err(|_| {
        GroupError::Serialization(format!("group id must be 32 bytes, got {}", bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use openmls::prelude::BasicCredential;

    use super::*;

    #[test]
    fn missing_extension_is_named_error() {
        let extensions = Extensions::empty();
        assert_eq!(group_data_from(&extensions), Err(GroupError::NoMarmotGroupData));
    }

    #[test]
    fn decodes_group_data_extension() {
        let data = GroupData::new([3; 32], "Test");
        let encoded = data.encode().expect("encode");
        let extensions = Extensions::single(Extension::Unknown(
            MARMOT_GROUP_DATA_EXTENSION_TYPE,
            UnknownExtension(encoded),
        ));

        assert_eq!(group_data_from(&extensions), Ok(data));
    }

    #[test]
    fn corrupt_extension_is_codec_error() {
        let extensions = Extensions::single(Extension::Unknown(
            MARMOT_GROUP_DATA_EXTENSION_TYPE,
            UnknownExtension(vec![0x01, 0x02]),
        ));

        assert!(matches!(group_data_from(&extensions), Err(GroupError::Codec(_))));
    }

    #[test]
    fn identity_requires_32_bytes() {
        let credential: Credential = BasicCredential::new(vec![1; 32]).into();
        assert_eq!(identity_of(&credential), Ok([1; 32]));

        let credential: Credential = BasicCredential::new(vec![1; 8]).into();
        assert!(matches!(identity_of(&credential), Err(GroupError::InvalidIdentity { .. })));
    }
}
