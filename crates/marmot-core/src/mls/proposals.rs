//! Proposal builders.
//!
//! Pure functions from a [`GroupView`] snapshot and the caller's intent to a
//! [`Proposal`] value. Nothing here touches the engine or the group: building
//! a proposal never changes state, committing it does.

use marmot_proto::{Event, GroupData, MARMOT_GROUP_DATA_EXTENSION_TYPE};
use openmls::prelude::{Extension, Extensions, KeyPackage, UnknownExtension};
use openmls_traits::crypto::OpenMlsCrypto;

use super::{
    key_package,
    view::{GroupView, IdentityKey, identity_of},
};
use crate::GroupError;

/// A membership or context change, not yet binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Add the owner of a verified key package
    Add(KeyPackage),
    /// Remove the member at a leaf index
    Remove(u32),
    /// Replace the group context extensions wholesale
    UpdateMetadata(Extensions),
}

impl Proposal {
    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::UpdateMetadata(_) => "update_metadata",
        }
    }
}

/// Where an invitee's key package comes from.
#[derive(Debug, Clone)]
pub enum KeyPackageSource {
    /// TLS-serialized key package
    Raw(Vec<u8>),
    /// Already decoded and verified
    Parsed(KeyPackage),
    /// Kind-443 key package event
    Event(Event),
}

/// Field-level changes to the group data. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDataPatch {
    /// New display name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// Replacement admin list
    pub admin_pubkeys: Option<Vec<IdentityKey>>,
    /// Replacement relay list
    pub relays: Option<Vec<String>>,
    /// New image hash
    pub image_hash: Option<[u8; 32]>,
    /// New image key
    pub image_key: Option<[u8; 32]>,
    /// New image nonce
    pub image_nonce: Option<[u8; 12]>,
}

impl GroupDataPatch {
    /// Patch that renames the group.
    pub fn name(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge over `current`. Duplicate admin keys are dropped, first one wins.
    pub fn apply(&self, current: &GroupData) -> GroupData {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            next.description.clone_from(description);
        }
        if let Some(admins) = &self.admin_pubkeys {
            next.admin_pubkeys = dedup(admins);
        }
        if let Some(relays) = &self.relays {
            next.relays.clone_from(relays);
        }
        if let Some(hash) = self.image_hash {
            next.image_hash = hash;
        }
        if let Some(key) = self.image_key {
            next.image_key = key;
        }
        if let Some(nonce) = self.image_nonce {
            next.image_nonce = nonce;
        }
        next
    }
}

pub(crate) fn dedup(keys: &[IdentityKey]) -> Vec<IdentityKey> {
    let mut out: Vec<IdentityKey> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(key) {
            out.push(*key);
        }
    }
    out
}

/// Build an `Add` proposal for an invitee.
///
/// # Errors
///
/// - `GroupError::InvalidKeyPackage` / `GroupError::Event` if the source does
///   not decode or verify
/// - `GroupError::MissingGroupDataSupport` if the key package cannot join a
///   Marmot group
/// - `GroupError::CipherSuiteMismatch` if it uses another suite than the group
/// - `GroupError::InvalidIdentity` if its credential is not a Marmot identity
pub fn invite(
    view: &GroupView,
    crypto: &impl OpenMlsCrypto,
    source: KeyPackageSource,
) -> Result<Proposal, GroupError> {
    let key_package = match source {
        KeyPackageSource::Raw(bytes) => key_package::parse(crypto, &bytes)?,
        KeyPackageSource::Parsed(key_package) => key_package,
        KeyPackageSource::Event(event) => key_package::from_event(crypto, &event)?,
    };

    key_package::require_group_support(&key_package)?;

    if key_package.ciphersuite() != view.cipher_suite {
        return Err(GroupError::CipherSuiteMismatch {
            expected: view.cipher_suite as u16,
            actual: key_package.ciphersuite() as u16,
        });
    }

    identity_of(key_package.leaf_node().credential())?;

    Ok(Proposal::Add(key_package))
}

/// Build a `Remove` proposal for the member at `leaf_index`.
///
/// Removing oneself is not prevented here. Whether that is allowed is the
/// caller's policy.
pub fn remove(view: &GroupView, leaf_index: u32) -> Result<Proposal, GroupError> {
    view.member(leaf_index).ok_or(GroupError::MemberNotFound(leaf_index))?;
    Ok(Proposal::Remove(leaf_index))
}

/// Build an `UpdateMetadata` proposal from a patch.
///
/// The patch is merged over the current group data, re-encoded, and swapped in
/// for the existing `0xF2EE` extension. Every other extension is carried over
/// unchanged.
pub fn update_metadata(view: &GroupView, patch: &GroupDataPatch) -> Result<Proposal, GroupError> {
    let next = patch.apply(&view.group_data);
    let encoded = next.encode()?;

    let mut replaced = false;
    let extensions = view
        .extensions
        .iter()
        .map(|ext| match ext {
            Extension::Unknown(MARMOT_GROUP_DATA_EXTENSION_TYPE, _) => {
                replaced = true;
                Extension::Unknown(
                    MARMOT_GROUP_DATA_EXTENSION_TYPE,
                    UnknownExtension(encoded.clone()),
                )
            },
            other => other.clone(),
        })
        .collect::<Vec<_>>();

    if !replaced {
        return Err(GroupError::NoMarmotGroupData);
    }

    let extensions = Extensions::from_vec(extensions)
        .map_err(|e| GroupError::engine("build extension set", e))?;

    Ok(Proposal::UpdateMetadata(extensions))
}

#[cfg(test)]
mod tests {
    use openmls::prelude::{Ciphersuite, RequiredCapabilitiesExtension};

    use super::*;
    use crate::mls::{
        constants::{DEFAULT_CIPHERSUITE, GROUP_DATA_EXTENSION},
        view::{Member, group_data_from},
    };

    fn view_with(data: &GroupData) -> GroupView {
        let extensions = Extensions::from_vec(vec![
            Extension::Unknown(
                MARMOT_GROUP_DATA_EXTENSION_TYPE,
                UnknownExtension(data.encode().expect("encode")),
            ),
            Extension::RequiredCapabilities(RequiredCapabilitiesExtension::new(
                &[GROUP_DATA_EXTENSION],
                &[],
                &[],
            )),
        ])
        .expect("extensions");

        GroupView {
            group_id: [1; 32],
            cipher_suite: DEFAULT_CIPHERSUITE,
            epoch: 3,
            own_leaf_index: 0,
            members: vec![
                Member {
                    leaf_index: 0,
                    identity: vec![1; 32],
                    signature_key: vec![],
                    is_creator: true,
                },
                Member {
                    leaf_index: 2,
                    identity: vec![2; 32],
                    signature_key: vec![],
                    is_creator: false,
                },
            ],
            group_data: data.clone(),
            extensions,
            confirmed_transcript_hash: vec![],
            tree_hash: vec![],
            epoch_authenticator: vec![],
        }
    }

    fn sample_data() -> GroupData {
        let mut data = GroupData::new([5; 32], "Old");
        data.description = "D".to_string();
        data.admin_pubkeys = vec![[1; 32]];
        data.relays = vec!["wss://relay.example".to_string()];
        data
    }

    #[test]
    fn rename_keeps_description() {
        let view = view_with(&sample_data());

        let proposal = update_metadata(&view, &GroupDataPatch::name("X")).expect("build");

        let Proposal::UpdateMetadata(extensions) = proposal else {
            panic!("expected metadata proposal");
        };
        let data = group_data_from(&extensions).expect("group data present");
        assert_eq!(data.name, "X");
        assert_eq!(data.description, "D");
        assert_eq!(data.admin_pubkeys, vec![[1; 32]]);
        assert_eq!(data.relays, view.group_data.relays);
    }

    #[test]
    fn update_keeps_other_extensions() {
        let view = view_with(&sample_data());

        let Proposal::UpdateMetadata(extensions) =
            update_metadata(&view, &GroupDataPatch::name("X")).expect("build")
        else {
            panic!("expected metadata proposal");
        };

        assert!(extensions.required_capabilities().is_some());
        assert_eq!(extensions.iter().count(), view.extensions.iter().count());
    }

    #[test]
    fn update_without_group_data_is_rejected() {
        let mut view = view_with(&sample_data());
        view.extensions = Extensions::empty();

        assert_eq!(
            update_metadata(&view, &GroupDataPatch::name("X")),
            Err(GroupError::NoMarmotGroupData)
        );
    }

    #[test]
    fn patch_deduplicates_admins() {
        let patch = GroupDataPatch {
            admin_pubkeys: Some(vec![[3; 32], [4; 32], [3; 32]]),
            ..GroupDataPatch::default()
        };

        let next = patch.apply(&sample_data());

        assert_eq!(next.admin_pubkeys, vec![[3; 32], [4; 32]]);
        assert_eq!(next.name, "Old");
    }

    #[test]
    fn empty_patch_is_identity() {
        let data = sample_data();
        assert!(GroupDataPatch::default().is_empty());
        assert_eq!(GroupDataPatch::default().apply(&data), data);
    }

    #[test]
    fn remove_requires_existing_member() {
        let view = view_with(&sample_data());

        assert_eq!(remove(&view, 2), Ok(Proposal::Remove(2)));
        assert_eq!(remove(&view, 1), Err(GroupError::MemberNotFound(1)));
    }

    #[test]
    fn remove_allows_own_leaf() {
        let view = view_with(&sample_data());
        assert_eq!(remove(&view, view.own_leaf_index), Ok(Proposal::Remove(0)));
    }

    #[test]
    fn invite_with_garbage_is_rejected_not_panicking() {
        let view = view_with(&sample_data());
        let crypto = openmls_rust_crypto::RustCrypto::default();

        let result = invite(&view, &crypto, KeyPackageSource::Raw(vec![0; 8]));

        assert!(matches!(result, Err(GroupError::InvalidKeyPackage { .. })));
    }

    #[test]
    fn invite_rejects_other_suite() {
        use openmls_basic_credential::SignatureKeyPair;

        use crate::{SystemEnv, mls::provider::MarmotProvider};

        let provider = MarmotProvider::new(SystemEnv);
        let suite = Ciphersuite::MLS_128_DHKEMP256_AES128GCM_SHA256_P256;
        let signer = SignatureKeyPair::new(suite.signature_algorithm()).expect("keypair");
        let complete =
            key_package::generate(&provider, &signer, &[9; 32], suite, &[]).expect("generate");
        let view = view_with(&sample_data());

        let result = invite(
            &view,
            openmls_traits::OpenMlsProvider::crypto(&provider),
            KeyPackageSource::Parsed(complete.key_package),
        );

        assert_eq!(
            result,
            Err(GroupError::CipherSuiteMismatch { expected: 0x0001, actual: suite as u16 })
        );
    }
}
