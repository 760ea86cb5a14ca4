use crate::api::ObjectKey;
use strum_macros::{AsRefStr, Display};

/// All types of objects which are storable in our store.
#[derive(Display, AsRefStr, Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorableObjectType {
    VolumeSpec,
    AttachmentSpec,
    SnapshotSpec,
    VolumeTypeSpec,
    CoreRegistryConfig,
}

/// Prefix for all keys stored in the persistent store.
pub const STORE_KEY_PREFIX: &str = "/volans.io/control-plane";

/// Returns the key prefix that is used for the keys.
pub fn key_prefix(api_version: u64) -> String {
    build_key_prefix(api_version)
}

/// Returns the versioned key prefix that is used for the keys.
pub fn build_key_prefix(api_version: u64) -> String {
    format!("{}/apis/v{}", STORE_KEY_PREFIX, api_version)
}

/// Returns the control plane prefix that should be used for the keys, in conjunction
/// with a `StorableObjectType` type.
pub fn key_prefix_obj<K: AsRef<str>>(key_type: K, api_version: u64) -> String {
    format!("{}/{}", key_prefix(api_version), key_type.as_ref())
}

/// Create a key based on the object's key trait.
pub fn generate_key<K: ObjectKey + ?Sized>(k: &K) -> String {
    format!("{}/{}", key_prefix_obj(k.key_type(), 0), k.key_uuid())
}
