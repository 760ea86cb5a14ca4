use crate::{keys::generate_key, Error, StorableObjectType};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Trait defining the operations that can be performed on a key-value store.
#[async_trait]
pub trait Store: StoreKv + StoreObj + Sync + Send + Clone {
    async fn online(&mut self) -> bool;
}

/// Trait defining the operations that can be performed on a key-value store.
/// This is strictly intended for a KV type access.
#[async_trait]
pub trait StoreKv: Sync + Send + Clone {
    /// Puts the given `V` value into the store under the given `K` key.
    async fn put_kv<K: StoreKey, V: StoreValue>(&mut self, key: &K, value: &V)
        -> Result<(), Error>;
    /// Get the value from the given `K` key entry from the store.
    async fn get_kv<K: StoreKey>(&mut self, key: &K) -> Result<Value, Error>;
    /// Deletes the given `K` key entry from the store.
    async fn delete_kv<K: StoreKey>(&mut self, key: &K) -> Result<(), Error>;

    /// Returns a vector of tuples. Each tuple represents a key-value pair.
    async fn get_values_prefix(&mut self, key_prefix: &str) -> Result<Vec<(String, Value)>, Error>;
    /// Deletes all key values from a given prefix.
    async fn delete_values_prefix(&mut self, key_prefix: &str) -> Result<(), Error>;
}

/// Trait defining the operations that can be performed on a key-value store using object
/// semantics. It allows for abstracting the key component into the `StorableObject` itself.
#[async_trait]
pub trait StoreObj: StoreKv + Sync + Send + Clone {
    /// Puts the given `O` object into the store.
    async fn put_obj<O: StorableObject>(&mut self, object: &O) -> Result<(), Error>;
    /// Gets the object `O` through its `O::Key`.
    async fn get_obj<O: StorableObject>(&mut self, key: &O::Key) -> Result<O, Error>;
}

/// Store keys type trait.
pub trait StoreKey: Sync + ToString {}
impl<T> StoreKey for T where T: Sync + ToString {}
/// Store value type trait.
pub trait StoreValue: Sync + serde::Serialize {}
impl<T> StoreValue for T where T: Sync + serde::Serialize {}

/// Implemented by Keys of Storable Objects.
pub trait ObjectKey: Sync + Send {
    fn key(&self) -> String {
        generate_key(self)
    }
    fn key_type(&self) -> StorableObjectType;
    fn key_uuid(&self) -> String;
}

/// Implemented by objects which get stored in the store.
#[async_trait]
pub trait StorableObject: Serialize + Sync + Send + DeserializeOwned {
    type Key: ObjectKey;

    fn key(&self) -> Self::Key;
}
