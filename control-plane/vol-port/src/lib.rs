#![warn(missing_docs)]
//! Shared transport and persistent-store types for the volans control plane.
//!
//! The `transport` module carries the identifiers, statuses and request types
//! exchanged between the service frontends and the core agent, while the
//! `store` module carries the records and operation logs which get persisted
//! through the `memstor` interface.

/// Transport types: identifiers, statuses and request messages.
pub mod transport;

/// Persistent store types: specs and their operation transaction logs.
pub mod store;

/// Walks an error's source chain and joins every message, so the whole story
/// can be logged as a single field.
pub trait ErrorChain: std::error::Error {
    /// Full error chain, colon separated.
    fn full_string(&self) -> String {
        let mut string = self.to_string();
        let mut source = self.source();
        while let Some(error) = source {
            string = format!("{}: {}", string, error);
            source = error.source();
        }
        string
    }
}
impl<T: std::error::Error> ErrorChain for T {}
