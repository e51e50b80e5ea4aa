//! Marmot protocol constants.

use marmot_proto::MARMOT_GROUP_DATA_EXTENSION_TYPE;
use openmls::prelude::{Ciphersuite, ExtensionType};

/// Cipher suite used when the caller does not choose one.
pub const DEFAULT_CIPHERSUITE: Ciphersuite =
    Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

/// The group data extension as an MLS extension type.
pub const GROUP_DATA_EXTENSION: ExtensionType =
    ExtensionType::Unknown(MARMOT_GROUP_DATA_EXTENSION_TYPE);

/// MLS protocol version as written in key package event tags.
pub const MLS_PROTOCOL_VERSION_TAG: &str = "1.0";

/// Length of Marmot identity keys carried in basic credentials.
pub const IDENTITY_LEN: usize = 32;
