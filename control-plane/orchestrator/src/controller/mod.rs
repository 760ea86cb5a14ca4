//! The controller: the registry holding every known resource, the resource
//! maps, and the guarded operation machinery which serializes and persists
//! every record mutation.

/// The registry which contains all the resources.
pub mod registry;

/// Resource wrappers, guards and the guarded operation helpers.
pub mod resources;
