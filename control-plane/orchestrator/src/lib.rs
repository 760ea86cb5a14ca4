//! Volume lifecycle orchestrator.
//!
//! The core of the control plane: it owns the volume records, serializes
//! mutating operations per volume, drives the create/attach/extend/manage
//! pipelines through the flow engine, and runs the migration/retype state
//! machine over pluggable backend drivers, falling back to the generic data
//! copy engine when a backend cannot move the data itself.

/// Service level errors.
pub mod errors;
pub use errors::SvcError;

/// The backend capability interface.
pub mod backend;

/// The controller: registry, resource maps and guarded operations.
pub mod controller;

/// The generic data copy engine.
pub mod copy;

/// The task orchestration engine.
pub mod flow;

/// Lifecycle event notifications.
pub mod notify;

/// Quota reservations.
pub mod quota;

/// The volume operations: lifecycle, migration and retype.
pub mod volume;
