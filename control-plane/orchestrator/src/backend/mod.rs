//! The contract a storage backend driver must satisfy.
//!
//! One implementation exists per storage backend vendor; all of them expose
//! the same capability set and error taxonomy. The orchestration core never
//! talks to a backend any other way.

use crate::{copy::VolumeHandle, SvcError};
use async_trait::async_trait;
use vol_port::{
    store::{snapshot::SnapshotSpec, volume::VolumeSpec, volume_type::VolumeTypeSpec},
    transport::{BackendName, HostLocator, ReplicationStatus},
};

/// Fields a driver may hand back for merging into the volume record after an
/// operation. The provider location is owned exclusively by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelUpdate {
    /// New backend-specific locator.
    pub provider_location: Option<String>,
    /// New replication state.
    pub replication_status: Option<ReplicationStatus>,
}

impl ModelUpdate {
    /// Merge the update into a volume record.
    pub fn apply(&self, spec: &mut VolumeSpec) {
        if let Some(location) = &self.provider_location {
            spec.provider_location = Some(location.clone());
        }
        if let Some(replication) = self.replication_status {
            spec.replication_status = replication;
        }
    }
}

/// Outcome of asking a driver to migrate a volume natively.
/// Declining is a normal negative result, not an error: it routes the
/// migration through the generic data copy engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrateOutcome {
    /// The driver cannot move this volume itself.
    Declined,
    /// The driver moved the volume and reports the resulting model changes.
    Moved(ModelUpdate),
}

/// Capabilities reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    /// The backend can skip zero extents when receiving a copy.
    pub sparse_copy_volume: bool,
    /// The backend supports multiple concurrent attachments per volume.
    pub multiattach: bool,
}

/// Host capability descriptor used when attaching a volume for host access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorProperties {
    /// The initiator identifier, eg an iSCSI IQN or NVMe NQN.
    pub initiator: String,
    /// The host requesting the attachment.
    pub host: String,
    /// Whether the host multipaths its block devices.
    pub multipath: bool,
}

impl ConnectorProperties {
    /// Connector for a plain named host with no multipathing.
    pub fn for_host(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            initiator: format!("iqn.2004-10.io.volans:{host}"),
            host,
            multipath: false,
        }
    }
}

/// Device information returned by a successful attach.
#[derive(Debug)]
pub struct AttachInfo {
    /// Where the attached volume's bytes can be read and written.
    pub handle: VolumeHandle,
}

/// The capability set a storage backend driver provides to the orchestration
/// core. Long-running calls block for their full duration; there is no
/// mid-operation cancellation.
#[async_trait]
pub trait BackendDriver: Send + Sync + std::fmt::Debug {
    /// The backend this driver serves.
    fn name(&self) -> &BackendName;

    /// Whether the driver completed its initialization handshake.
    fn ready(&self) -> bool;

    /// Allocate a blank volume.
    async fn create_volume(&self, volume: &VolumeSpec) -> Result<ModelUpdate, SvcError>;

    /// Allocate a volume holding the content of a snapshot.
    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeSpec,
        snapshot: &SnapshotSpec,
    ) -> Result<ModelUpdate, SvcError>;

    /// Allocate a volume cloned from another volume.
    async fn create_cloned_volume(
        &self,
        volume: &VolumeSpec,
        source: &VolumeSpec,
    ) -> Result<ModelUpdate, SvcError>;

    /// Release the backend allocation of a volume.
    async fn delete_volume(&self, volume: &VolumeSpec) -> Result<(), SvcError>;

    /// Grow a volume to `new_size` GiB.
    async fn extend_volume(&self, volume: &VolumeSpec, new_size: u64) -> Result<(), SvcError>;

    /// Take a point-in-time snapshot of a volume.
    async fn create_snapshot(
        &self,
        volume: &VolumeSpec,
        snapshot: &SnapshotSpec,
    ) -> Result<(), SvcError>;

    /// Release a snapshot.
    async fn delete_snapshot(&self, snapshot: &SnapshotSpec) -> Result<(), SvcError>;

    /// Bring an existing backend volume under management.
    async fn manage_existing(
        &self,
        volume: &VolumeSpec,
        existing_ref: &str,
    ) -> Result<ModelUpdate, SvcError>;

    /// Move a volume to `destination` natively, without copying through the
    /// host. Returning `MigrateOutcome::Declined` is a normal negative
    /// result; an `Err` is a fatal driver failure.
    async fn migrate_volume(
        &self,
        volume: &VolumeSpec,
        destination: &HostLocator,
    ) -> Result<MigrateOutcome, SvcError>;

    /// Change a volume's type in place. `Ok(false)` means the driver cannot
    /// satisfy the new type without moving the data.
    async fn retype(
        &self,
        volume: &VolumeSpec,
        new_type: &VolumeTypeSpec,
    ) -> Result<bool, SvcError>;

    /// Expose a volume's bytes to the connecting host.
    async fn attach_volume(
        &self,
        volume: &VolumeSpec,
        connector: &ConnectorProperties,
    ) -> Result<AttachInfo, SvcError>;

    /// Withdraw a volume from the connecting host.
    async fn detach_volume(
        &self,
        volume: &VolumeSpec,
        connector: &ConnectorProperties,
    ) -> Result<(), SvcError>;

    /// Report the backend's capabilities.
    async fn get_capabilities(&self) -> Result<Capabilities, SvcError>;

    /// Backend-specific identity fixup after a migration, letting the driver
    /// move backend metadata from the old volume onto the new one. Drivers
    /// without such metadata return `SvcError::NotSupported`, which callers
    /// treat as a no-op.
    async fn update_migrated_volume(
        &self,
        volume: &VolumeSpec,
        new_volume: &VolumeSpec,
    ) -> Result<(), SvcError> {
        let _ = (volume, new_volume);
        Err(SvcError::NotSupported {
            operation: "update_migrated_volume".to_string(),
        })
    }
}
