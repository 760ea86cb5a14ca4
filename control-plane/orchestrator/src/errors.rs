use crate::copy::CopyError;
use snafu::Snafu;
use vol_port::transport::ResourceKind;

/// Common error type for control plane operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)]
pub enum SvcError {
    #[snafu(display("Volume '{}' not found", vol_id))]
    VolumeNotFound { vol_id: String },
    #[snafu(display("Snapshot '{}' not found", snap_id))]
    SnapshotNotFound { snap_id: String },
    #[snafu(display("Volume type '{}' not found", type_id))]
    VolumeTypeNotFound { type_id: String },
    #[snafu(display("Attachment '{}' not found on volume '{}'", attachment, vol_id))]
    AttachmentNotFound { attachment: String, vol_id: String },
    #[snafu(display("Backend '{}' not found", backend))]
    BackendNotFound { backend: String },
    #[snafu(display("Backend '{}' driver is not initialized", backend))]
    DriverNotInitialized { backend: String },
    #[snafu(display("{} '{}' not found", kind.to_string(), id))]
    NotFound { kind: ResourceKind, id: String },
    #[snafu(display("Invalid Arguments"))]
    InvalidArguments {},
    #[snafu(display("Volume '{}' is invalid for the operation: {}", vol_id, reason))]
    InvalidVolume { vol_id: String, reason: String },
    #[snafu(display("Migration of volume '{}' failed: {}", vol_id, reason))]
    MigrationFailed { vol_id: String, reason: String },
    #[snafu(display("Data copy for volume '{}' failed", vol_id))]
    CopyFailed { vol_id: String, source: CopyError },
    #[snafu(display("Quota exceeded for resources: {}", resources.join(", ")))]
    OverQuota { resources: Vec<String> },
    #[snafu(display("Operation '{}' is not supported by the backend", operation))]
    NotSupported { operation: String },
    #[snafu(display("Conflicts with existing operation - please retry"))]
    Conflict {},
    #[snafu(display("Pending deletion - please retry"))]
    Deleting {},
    #[snafu(display("{} '{}' is still being created..", kind.to_string(), id))]
    PendingCreation { id: String, kind: ResourceKind },
    #[snafu(display("{} '{}' is being deleted..", kind.to_string(), id))]
    PendingDeletion { id: String, kind: ResourceKind },
    #[snafu(display("{} '{}' already exists", kind.to_string(), id))]
    AlreadyExists { kind: ResourceKind, id: String },
    #[snafu(display("{} '{}' is still in use", kind.to_string(), id))]
    InUse { kind: ResourceKind, id: String },
    #[snafu(display(
        "Retried creation of resource id {} kind {} with different parameters. Existing resource: {}, Request: {}",
        id,
        kind.to_string(),
        resource,
        request
    ))]
    ReCreateMismatch {
        id: String,
        kind: ResourceKind,
        resource: String,
        request: String,
    },
    #[snafu(display("{} '{}' is not a valid uuid", kind.to_string(), uuid))]
    InvalidUuid { uuid: String, kind: ResourceKind },
    #[snafu(display("Storage Error"))]
    Store { source: memstor::Error },
    #[snafu(display("Storage Error: {} Config for Resource id {} not committed to the store", kind.to_string(), id))]
    StoreSave { kind: ResourceKind, id: String },
    #[snafu(display("{} Resource id {} has an unflushed operation log", kind.to_string(), id))]
    StoreDirty { kind: ResourceKind, id: String },
    #[snafu(display("Flow '{}' has no provider for required input '{}'", flow, key))]
    FlowInput { flow: String, key: String },
    #[snafu(display("Internal error: {}", details))]
    Internal { details: String },
}

impl From<memstor::Error> for SvcError {
    fn from(source: memstor::Error) -> Self {
        Self::Store { source }
    }
}
