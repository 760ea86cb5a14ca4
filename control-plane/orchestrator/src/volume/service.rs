//! The volume service: the entry point for every volume request. It takes
//! the per-volume operation guard, dispatches to the operation
//! implementations, and brackets each request with lifecycle notifications.

use crate::{
    controller::{
        registry::Registry,
        resources::{
            operations::{
                ResourceAttach, ResourceLifecycle, ResourceManagement, ResourceMigration,
                ResourceResize, ResourceRetype, ResourceSnapshotting,
            },
            OperationGuardArc,
        },
    },
    notify::Notification,
    SvcError,
};
use vol_port::{
    store::{attachment::AttachmentSpec, snapshot::SnapshotSpec, volume::VolumeSpec,
        volume_type::VolumeTypeSpec},
    transport::{
        AttachVolume, CreateSnapshot, CreateVolume, DestroySnapshot, DestroyVolume, DetachVolume,
        ExtendVolume, ManageVolume, MigrateVolume, RetypeVolume, VolumeId,
    },
};

/// The volume service.
#[derive(Debug, Clone)]
pub struct Service {
    registry: Registry,
}

impl Service {
    /// Return a new `Self` over the given registry.
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// The registry backing this service.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bracket an operation with `<event>.start` / `<event>.end|error`
    /// notifications.
    async fn notified<F, T>(&self, uuid: &VolumeId, event: &str, operation: F) -> Result<T, SvcError>
    where
        F: std::future::Future<Output = Result<T, SvcError>>,
    {
        self.registry
            .notify(Notification::volume(uuid, format!("{event}.start")))
            .await;
        let result = operation.await;
        let suffix = if result.is_ok() { "end" } else { "error" };
        self.registry
            .notify(Notification::volume(uuid, format!("{event}.{suffix}")))
            .await;
        result
    }

    /// Get the current record of a volume.
    pub fn get_volume(&self, uuid: &VolumeId) -> Result<VolumeSpec, SvcError> {
        self.registry.specs().volume_clone(uuid)
    }

    /// Get the current records of all volumes.
    pub fn volumes(&self) -> Vec<VolumeSpec> {
        self.registry.specs().volumes()
    }

    /// Create a volume from the given request.
    pub async fn create_volume(&self, request: &CreateVolume) -> Result<VolumeSpec, SvcError> {
        self.notified(&request.uuid, "create", async {
            OperationGuardArc::<VolumeSpec>::create(&self.registry, request).await?;
            self.registry.specs().volume_clone(&request.uuid)
        })
        .await
    }

    /// Delete a volume.
    pub async fn destroy_volume(&self, request: &DestroyVolume) -> Result<(), SvcError> {
        self.notified(&request.uuid, "delete", async {
            let mut volume = self.registry.specs().volume(&request.uuid).await?;
            volume.destroy(&self.registry, request).await
        })
        .await
    }

    /// Attach a volume to a consumer.
    pub async fn attach_volume(
        &self,
        request: &AttachVolume,
    ) -> Result<AttachmentSpec, SvcError> {
        self.notified(&request.uuid, "attach", async {
            let mut volume = self.registry.specs().volume(&request.uuid).await?;
            volume.attach(&self.registry, request).await
        })
        .await
    }

    /// Detach a volume from a consumer.
    pub async fn detach_volume(&self, request: &DetachVolume) -> Result<(), SvcError> {
        self.notified(&request.uuid, "detach", async {
            let mut volume = self.registry.specs().volume(&request.uuid).await?;
            volume.detach(&self.registry, request).await
        })
        .await
    }

    /// Extend a volume.
    pub async fn extend_volume(&self, request: &ExtendVolume) -> Result<VolumeSpec, SvcError> {
        self.notified(&request.uuid, "resize", async {
            let mut volume = self.registry.specs().volume(&request.uuid).await?;
            volume.resize(&self.registry, request).await?;
            self.registry.specs().volume_clone(&request.uuid)
        })
        .await
    }

    /// Migrate a volume's data to another backend placement.
    pub async fn migrate_volume(&self, request: &MigrateVolume) -> Result<VolumeSpec, SvcError> {
        self.notified(&request.uuid, "migrate", async {
            let mut volume = self.registry.specs().volume(&request.uuid).await?;
            volume.migrate(&self.registry, request).await?;
            self.registry.specs().volume_clone(&request.uuid)
        })
        .await
    }

    /// Change a volume's type, possibly moving its data.
    pub async fn retype_volume(&self, request: &RetypeVolume) -> Result<VolumeSpec, SvcError> {
        self.notified(&request.uuid, "retype", async {
            let mut volume = self.registry.specs().volume(&request.uuid).await?;
            volume.retype(&self.registry, request).await?;
            self.registry.specs().volume_clone(&request.uuid)
        })
        .await
    }

    /// Bring an existing backend volume under management.
    pub async fn manage_volume(&self, request: &ManageVolume) -> Result<VolumeSpec, SvcError> {
        self.notified(&request.uuid, "manage", async {
            OperationGuardArc::<VolumeSpec>::manage(&self.registry, request).await?;
            self.registry.specs().volume_clone(&request.uuid)
        })
        .await
    }

    /// Take a snapshot of a volume.
    pub async fn create_snapshot(
        &self,
        request: &CreateSnapshot,
    ) -> Result<SnapshotSpec, SvcError> {
        self.notified(&request.volume, "snapshot.create", async {
            let mut volume = self.registry.specs().volume(&request.volume).await?;
            volume.create_snap(&self.registry, request).await
        })
        .await
    }

    /// Delete a snapshot.
    pub async fn destroy_snapshot(&self, request: &DestroySnapshot) -> Result<(), SvcError> {
        let snapshot = self.registry.specs().snapshot(&request.uuid)?;
        self.notified(&snapshot.volume, "snapshot.delete", async {
            let mut volume = self.registry.specs().volume(&snapshot.volume).await?;
            volume.destroy_snap(&self.registry, request).await
        })
        .await
    }

    /// Register a volume type.
    pub async fn register_volume_type(
        &self,
        volume_type: VolumeTypeSpec,
    ) -> Result<(), SvcError> {
        self.registry.store_obj(&volume_type).await?;
        self.registry.specs().insert_volume_type(volume_type);
        Ok(())
    }
}
