//! In-memory implementation of the store interface.
//!
//! All mutations are immediately observable to any subsequent get within the
//! process and an object put either lands whole or not at all, which is the
//! record-store contract the control plane relies on.

use crate::{
    api::{ObjectKey, StorableObject, Store, StoreKey, StoreKv, StoreObj, StoreValue},
    error::{DeserialiseValue, SerialiseValue},
    Error,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use snafu::ResultExt;
use std::sync::Arc;

/// Process-local key-value store with object semantics.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    values: Arc<RwLock<IndexMap<String, Value>>>,
}

impl MemStore {
    /// Return a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl StoreKv for MemStore {
    async fn put_kv<K: StoreKey, V: StoreValue>(
        &mut self,
        key: &K,
        value: &V,
    ) -> Result<(), Error> {
        let value = serde_json::to_value(value).context(SerialiseValue)?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get_kv<K: StoreKey>(&mut self, key: &K) -> Result<Value, Error> {
        let key = key.to_string();
        match self.values.read().get(&key) {
            Some(value) => Ok(value.clone()),
            None => Err(Error::MissingEntry { key }),
        }
    }

    async fn delete_kv<K: StoreKey>(&mut self, key: &K) -> Result<(), Error> {
        self.values.write().shift_remove(&key.to_string());
        Ok(())
    }

    async fn get_values_prefix(&mut self, key_prefix: &str) -> Result<Vec<(String, Value)>, Error> {
        let values = self.values.read();
        Ok(values
            .iter()
            .filter(|(key, _)| key.starts_with(key_prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn delete_values_prefix(&mut self, key_prefix: &str) -> Result<(), Error> {
        self.values
            .write()
            .retain(|key, _| !key.starts_with(key_prefix));
        Ok(())
    }
}

#[async_trait]
impl StoreObj for MemStore {
    async fn put_obj<O: StorableObject>(&mut self, object: &O) -> Result<(), Error> {
        let key = object.key().key();
        let value = serde_json::to_value(object).context(SerialiseValue)?;
        self.values.write().insert(key, value);
        Ok(())
    }

    async fn get_obj<O: StorableObject>(&mut self, key: &O::Key) -> Result<O, Error> {
        let value = self.get_kv(&key.key()).await?;
        serde_json::from_value(value.clone()).context(DeserialiseValue {
            value: value.to_string(),
        })
    }
}

#[async_trait]
impl Store for MemStore {
    async fn online(&mut self) -> bool {
        true
    }
}
