//! The memstor is an interface to a datastore which suits the project's needs.
//! The record store contract is strong read-after-write within the process,
//! with all-or-nothing object puts; the default implementation keeps the
//! records in process memory.

/// Error exposed by the memstor.
pub mod error;
/// Export error module.
pub use error::Error;

/// The stor interface.
mod api;
/// Export store api.
pub use api::{
    ObjectKey, StorableObject, Store, StoreKey, StoreKv, StoreObj, StoreValue,
};

/// Key layout shared by all store implementations.
mod keys;
pub use keys::{build_key_prefix, generate_key, key_prefix, key_prefix_obj, StorableObjectType};

/// A particular implementation of the store, kept in process memory.
pub mod mem;
pub use mem::MemStore;
