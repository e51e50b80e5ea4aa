//! Key package generation and validation.
//!
//! A key package is how a client becomes invitable: the public half is
//! published as a kind-443 event, the private half (init and encryption keys)
//! stays in the engine's storage until a Welcome arrives.
//!
//! Marmot groups require every member to understand the group data extension,
//! so [`generate`] always advertises `0xF2EE` in the leaf capabilities and
//! [`validate_for_group`] refuses key packages that do not.

use marmot_proto::{
    Event, Tag,
    event::{format_id, kind, parse_id, tag},
};
use openmls::prelude::{
    BasicCredential, Capabilities, Ciphersuite, CredentialWithKey, ExtensionType, KeyPackage,
    KeyPackageIn, MlsMessageBodyIn, MlsMessageIn, ProtocolVersion,
};
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::{OpenMlsProvider, crypto::OpenMlsCrypto};
use tls_codec::{Deserialize, Serialize};

use super::{
    constants::{GROUP_DATA_EXTENSION, MLS_PROTOCOL_VERSION_TAG},
    provider::MarmotProvider,
    view::IdentityKey,
};
use crate::{GroupError, env::Environment};

/// A freshly generated key package.
///
/// Only the public half is in here. The private half was written to the
/// provider's storage by the engine, keyed by `hash_ref`.
#[derive(Debug, Clone)]
pub struct CompleteKeyPackage {
    /// Public key package
    pub key_package: KeyPackage,
    /// TLS serialization of `key_package`
    pub serialized: Vec<u8>,
    /// Hash reference identifying the key package
    pub hash_ref: Vec<u8>,
}

/// Leaf capabilities advertising the group data extension plus `extra`.
pub fn marmot_capabilities(extra: &[ExtensionType]) -> Capabilities {
    let mut extensions = vec![GROUP_DATA_EXTENSION];
    extensions.extend(extra.iter().copied().filter(|ext| *ext != GROUP_DATA_EXTENSION));
    Capabilities::new(None, None, Some(&extensions), None, None)
}

/// Basic credential for `identity`, bound to `signer`'s public key.
pub fn credential_with_key(identity: &IdentityKey, signer: &SignatureKeyPair) -> CredentialWithKey {
    CredentialWithKey {
        credential: BasicCredential::new(identity.to_vec()).into(),
        signature_key: signer.public().into(),
    }
}

/// Generate a key package for `identity`.
///
/// Secret generation is delegated to the engine. The leaf capabilities list
/// the group data extension and any `extra` extensions.
pub fn generate<E: Environment>(
    provider: &MarmotProvider<E>,
    signer: &SignatureKeyPair,
    identity: &IdentityKey,
    ciphersuite: Ciphersuite,
    extra: &[ExtensionType],
) -> Result<CompleteKeyPackage, GroupError> {
    let bundle = KeyPackage::builder()
        .leaf_node_capabilities(marmot_capabilities(extra))
        .build(ciphersuite, provider, signer, credential_with_key(identity, signer))
        .map_err(|e| GroupError::engine("build key package", e))?;

    let key_package = bundle.key_package().clone();
    let serialized = key_package
        .tls_serialize_detached()
        .map_err(|e| GroupError::Serialization(format!("key package: {e}")))?;
    let hash_ref = key_package
        .hash_ref(provider.crypto())
        .map_err(|e| GroupError::engine("hash key package", e))?
        .as_slice()
        .to_vec();

    tracing::debug!(hash_ref = %hex::encode(&hash_ref), "generated key package");

    Ok(CompleteKeyPackage { key_package, serialized, hash_ref })
}

/// Whether `key_package` can join a Marmot group.
///
/// Checks that the leaf capabilities advertise the group data extension.
pub fn validate_for_group(key_package: &KeyPackage) -> bool {
    key_package.leaf_node().capabilities().extensions().contains(&GROUP_DATA_EXTENSION)
}

/// [`validate_for_group`] as a precondition.
pub fn require_group_support(key_package: &KeyPackage) -> Result<(), GroupError> {
    if validate_for_group(key_package) { Ok(()) } else { Err(GroupError::MissingGroupDataSupport) }
}

/// Decode and verify a serialized key package.
///
/// Verification (signature, lifetime, protocol version) is done by the
/// engine.
pub fn parse(crypto: &impl OpenMlsCrypto, bytes: &[u8]) -> Result<KeyPackage, GroupError> {
    let key_package_in = KeyPackageIn::tls_deserialize_exact(bytes)
        .map_err(|e| GroupError::InvalidKeyPackage { reason: format!("decode: {e}") })?;

    key_package_in
        .validate(crypto, ProtocolVersion::Mls10)
        .map_err(|e| GroupError::InvalidKeyPackage { reason: format!("verify: {e:?}") })
}

/// Decode a key package from its kind-443 event.
///
/// If the event declares a cipher suite, it must match the key package.
pub fn from_event(crypto: &impl OpenMlsCrypto, event: &Event) -> Result<KeyPackage, GroupError> {
    event.ensure_kind(kind::KEY_PACKAGE)?;
    let key_package = parse(crypto, &event.payload()?)?;

    if let Some(declared) = event.tag_values(tag::CIPHERSUITE).and_then(<[String]>::first) {
        let declared = parse_id(tag::CIPHERSUITE, declared)?;
        let actual = key_package.ciphersuite() as u16;
        if declared != actual {
            return Err(GroupError::InvalidKeyPackage {
                reason: format!(
                    "event declares suite {declared:#06x}, key package uses {actual:#06x}"
                ),
            });
        }
    }

    Ok(key_package)
}

/// Hash references of the key packages a serialized Welcome was built for.
pub fn welcome_recipients(welcome: &[u8]) -> Result<Vec<Vec<u8>>, GroupError> {
    let message = MlsMessageIn::tls_deserialize_exact(welcome)
        .map_err(|e| GroupError::Serialization(format!("welcome: {e}")))?;
    let MlsMessageBodyIn::Welcome(welcome) = message.extract() else {
        return Err(GroupError::UnexpectedMessage {
            expected: "welcome",
            actual: "another message type".to_string(),
        });
    };

    Ok(welcome.secrets().iter().map(|secrets| secrets.new_member().as_slice().to_vec()).collect())
}

/// Build the kind-443 event advertising `key_package`.
pub fn to_event(
    key_package: &CompleteKeyPackage,
    client: &str,
    relays: &[String],
    created_at: u64,
) -> Event {
    let kp = &key_package.key_package;
    let extensions = kp
        .leaf_node()
        .capabilities()
        .extensions()
        .iter()
        .map(|ext| format_id(u16::from(*ext)))
        .collect::<Vec<_>>();

    Event::with_payload(kind::KEY_PACKAGE, created_at, &key_package.serialized)
        .tag(Tag::new(tag::PROTOCOL_VERSION, [MLS_PROTOCOL_VERSION_TAG]))
        .tag(Tag::new(tag::CIPHERSUITE, [format_id(kp.ciphersuite() as u16)]))
        .tag(Tag::new(tag::EXTENSIONS, extensions))
        .tag(Tag::new(tag::CLIENT, [client]))
        .tag(Tag::new(tag::RELAYS, relays.iter().cloned()))
}
