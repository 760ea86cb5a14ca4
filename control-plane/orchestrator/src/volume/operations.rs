//! The volume operation implementations: every mutating operation runs under
//! the volume's exclusive operation guard and inside the two-phase record
//! transaction, so that a failure at any step leaves the record in a
//! terminal, consistent state.

use crate::{
    controller::{
        registry::Registry,
        resources::{
            operations::{
                ResourceAttach, ResourceLifecycle, ResourceManagement, ResourceMigration,
                ResourceResize, ResourceRetype, ResourceSnapshotting,
            },
            operations_helper::{
                GuardedOperationsHelper, OnCreateFail, OperationSequenceGuard,
            },
            OperationGuardArc, TraceStrLog,
        },
    },
    flow::{
        create_volume::{apply_model, create_volume_flow, keys},
        manage::manage_volume_flow,
        FlowStore,
    },
    quota::QuotaDeltas,
    volume::migration,
    SvcError,
};
use vol_port::{
    store::{
        snapshot::{SnapshotSpec, SnapshotStatus},
        volume::{
            AttachOperation, DetachOperation, MigrateOperation, RetypeOperation, VolumeOperation,
            VolumeSpec,
        },
        volume_type::VolumeTypeSpec,
    },
    transport::{
        AttachVolume, AttachmentId, CreateSnapshot, CreateVolume, DestroySnapshot, DestroyVolume,
        DetachVolume, ExtendVolume, ManageVolume, MigrateVolume, MigrationPolicy, MigrationStatus,
        RetypeVolume, VolumeContentSource, VolumeStatus,
    },
};

use crate::backend::ConnectorProperties;
use memstor::{ObjectKey, StorableObject};
use vol_port::store::attachment::AttachmentSpec;

#[async_trait::async_trait]
impl ResourceLifecycle for OperationGuardArc<VolumeSpec> {
    type Create = CreateVolume;
    type CreateOutput = Self;
    type Destroy = DestroyVolume;

    async fn create(
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<Self::CreateOutput, SvcError> {
        // referenced sources must exist before any record is mutated
        match &request.source {
            VolumeContentSource::None => {}
            VolumeContentSource::Snapshot(snapshot) => {
                registry.specs().snapshot(snapshot)?;
            }
            VolumeContentSource::Clone(source) => {
                registry.specs().volume_clone(source)?;
            }
        }

        let volume = registry
            .specs()
            .get_or_create_volume(request)
            .operation_guard_wait()
            .await?;
        let volume_clone = volume.start_create(registry, request).await?;

        let mut store = FlowStore::new();
        store.put(keys::VOLUME, volume_clone.clone());
        let result = create_volume_flow().run(registry, &mut store).await;
        if result.is_ok() {
            let mut spec = volume.lock();
            apply_model(&mut store, &mut spec);
        }

        volume
            .complete_create(result, registry, OnCreateFail::SetError)
            .await?;
        Ok(volume)
    }

    /// Destroy a volume based on the given `DestroyVolume` request.
    /// Legal from the deletable statuses and from mid-migration records,
    /// which can always be disposed of.
    async fn destroy(
        &mut self,
        registry: &Registry,
        _request: &Self::Destroy,
    ) -> Result<(), SvcError> {
        self.start_destroy(registry).await?;
        let spec_clone = self.lock().clone();

        let result = match registry.backend(spec_clone.host.backend()) {
            Ok(driver) => driver.delete_volume(&spec_clone).await,
            Err(error) => Err(error),
        };
        // migration targets never took quota, so disposing of them must not
        // release any
        if result.is_ok() && !spec_clone.is_migration_target() {
            let deltas = QuotaDeltas::default()
                .without_volume(spec_clone.size, spec_clone.volume_type.as_ref());
            match registry.quotas().reserve(&spec_clone.project, deltas).await {
                Ok(token) => {
                    registry.quotas().commit(token).await.ok();
                }
                Err(error) => {
                    self.error(&format!("Failed to release quota: {error}"));
                }
            }
        }
        self.complete_destroy(result, registry).await
    }
}

#[async_trait::async_trait]
impl ResourceAttach for OperationGuardArc<VolumeSpec> {
    type Attach = AttachVolume;
    type AttachOutput = AttachmentSpec;
    type Detach = DetachVolume;

    async fn attach(
        &mut self,
        registry: &Registry,
        request: &Self::Attach,
    ) -> Result<Self::AttachOutput, SvcError> {
        let attachment_id = AttachmentId::new();
        let spec_clone = self
            .start_update(
                registry,
                VolumeOperation::Attach(AttachOperation::new(attachment_id.clone())),
            )
            .await?;

        let attachment = AttachmentSpec {
            id: attachment_id,
            volume: spec_clone.uuid.clone(),
            instance_uuid: request.instance_uuid.clone(),
            attached_host: request.attached_host.clone(),
            mountpoint: request.mountpoint.clone(),
            mode: request.mode,
        };
        let result = async {
            let driver = registry.backend(spec_clone.host.backend())?;
            let connector = connector_for(registry, &attachment);
            driver.attach_volume(&spec_clone, &connector).await?;
            registry.store_obj(&attachment).await?;
            registry.specs().insert_attachment(attachment.clone());
            Ok(())
        }
        .await;

        self.complete_update(registry, result, spec_clone).await?;
        Ok(attachment)
    }

    async fn detach(
        &mut self,
        registry: &Registry,
        request: &Self::Detach,
    ) -> Result<(), SvcError> {
        let attachment = registry.specs().attachment(&request.attachment)?;
        if attachment.volume != request.uuid {
            return Err(SvcError::AttachmentNotFound {
                attachment: request.attachment.to_string(),
                vol_id: request.uuid.to_string(),
            });
        }
        let last = registry.specs().volume_attachments(&request.uuid).len() == 1;
        let spec_clone = self
            .start_update(
                registry,
                VolumeOperation::Detach(DetachOperation::new(request.attachment.clone(), last)),
            )
            .await?;

        let result = async {
            let driver = registry.backend(spec_clone.host.backend())?;
            let connector = connector_for(registry, &attachment);
            driver.detach_volume(&spec_clone, &connector).await?;
            registry.delete_kv(&attachment.key().key()).await?;
            registry.specs().remove_attachment(&attachment.id);
            Ok(())
        }
        .await;

        self.complete_update(registry, result, spec_clone).await
    }
}

/// The connector of an attachment's consumer, falling back to this agent's
/// own connector for host-less attachments.
fn connector_for(registry: &Registry, attachment: &AttachmentSpec) -> ConnectorProperties {
    match &attachment.attached_host {
        Some(host) => ConnectorProperties::for_host(host.clone()),
        None => registry.connector().clone(),
    }
}

#[async_trait::async_trait]
impl ResourceResize for OperationGuardArc<VolumeSpec> {
    type Resize = ExtendVolume;

    async fn resize(
        &mut self,
        registry: &Registry,
        request: &Self::Resize,
    ) -> Result<(), SvcError> {
        let spec_clone = self
            .start_update(registry, VolumeOperation::Extend(request.new_size))
            .await?;

        let deltas = QuotaDeltas::default().resize(
            spec_clone.size,
            request.new_size,
            spec_clone.volume_type.as_ref(),
        );
        let token = match registry.quotas().reserve(&spec_clone.project, deltas).await {
            Ok(token) => token,
            Err(error) => return self.complete_update(registry, Err(error), spec_clone).await,
        };

        let result = async {
            let driver = registry.backend(spec_clone.host.backend())?;
            driver.extend_volume(&spec_clone, request.new_size).await
        }
        .await;

        match &result {
            Ok(()) => {
                if let Err(error) = registry.quotas().commit(token).await {
                    self.error(&format!("Failed to commit quota reservation: {error}"));
                }
            }
            Err(_) => {
                registry.quotas().rollback(token).await.ok();
            }
        }
        self.complete_update(registry, result, spec_clone).await
    }
}

#[async_trait::async_trait]
impl ResourceMigration for OperationGuardArc<VolumeSpec> {
    type Migrate = MigrateVolume;

    async fn migrate(
        &mut self,
        registry: &Registry,
        request: &Self::Migrate,
    ) -> Result<(), SvcError> {
        let spec = self.as_ref().clone();
        // fail fast when the serving driver is not ready: nothing has been
        // started, so the status stays untouched and there is nothing to
        // clean up
        let driver = registry.backend(spec.host.backend())?;
        if !driver.ready() {
            let failed = {
                let mut locked = self.lock();
                locked.migration = MigrationStatus::Error;
                locked.clone()
            };
            registry.store_obj(&failed).await.ok();
            return Err(SvcError::DriverNotInitialized {
                backend: spec.host.backend().to_string(),
            });
        }

        let spec_clone = self
            .start_update(
                registry,
                VolumeOperation::Migrate(MigrateOperation::new(request.destination.clone())),
            )
            .await?;

        let result = migration::migrate_data(
            self,
            registry,
            &spec_clone,
            &request.destination,
            request.force_copy,
        )
        .await;
        self.complete_update(registry, result, spec_clone).await
    }
}

#[async_trait::async_trait]
impl ResourceRetype for OperationGuardArc<VolumeSpec> {
    type Retype = RetypeVolume;

    async fn retype(
        &mut self,
        registry: &Registry,
        request: &Self::Retype,
    ) -> Result<(), SvcError> {
        let spec = self.as_ref().clone();
        let new_type = registry.specs().volume_type(&request.new_type)?;
        let old_type = match &spec.volume_type {
            Some(id) => Some(registry.specs().volume_type(id)?),
            None => None,
        };
        let diff = VolumeTypeSpec::diff(old_type.as_ref(), &new_type);
        let same_placement = request
            .destination
            .as_ref()
            .map(|destination| destination.same_backend(&spec.host))
            .unwrap_or(true);

        // an empty diff never moves data nor transitions through retyping:
        // the record adopts the new type directly
        if diff.is_empty() {
            let spec_clone = self
                .start_update(
                    registry,
                    VolumeOperation::SetVolumeType(request.new_type.clone()),
                )
                .await?;
            let result = swap_type_quota(registry, &spec_clone, &new_type).await;
            return self.complete_update(registry, result, spec_clone).await;
        }

        if same_placement {
            // the serving backend must satisfy the new type in place
            let spec_clone = self
                .start_update(
                    registry,
                    VolumeOperation::Retype(RetypeOperation::new(
                        request.new_type.clone(),
                        None,
                        false,
                    )),
                )
                .await?;
            let result = async {
                let driver = registry.backend(spec_clone.host.backend())?;
                match driver.retype(&spec_clone, &new_type).await? {
                    true => Ok(()),
                    false => Err(SvcError::MigrationFailed {
                        vol_id: spec_clone.uuid.to_string(),
                        reason: "the backend cannot satisfy the new type in place and no \
                                 destination was resolved"
                            .to_string(),
                    }),
                }
            }
            .await;
            let result = match result {
                Ok(()) => swap_type_quota(registry, &spec_clone, &new_type).await,
                Err(error) => Err(error),
            };
            return self.complete_update(registry, result, spec_clone).await;
        }

        // retype with data movement; preconditions fail before any mutation
        let destination = request.destination.as_ref().expect("checked above");
        if request.policy == MigrationPolicy::Never {
            return Err(SvcError::MigrationFailed {
                vol_id: spec.uuid.to_string(),
                reason: "the new type requires a migration but the policy forbids it"
                    .to_string(),
            });
        }
        if !registry.specs().volume_snapshots(&spec.uuid).is_empty() {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                reason: "cannot retype with migration while snapshots exist".to_string(),
            });
        }
        if diff.replication_changed() {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                reason: "replication extra-specs mismatch".to_string(),
            });
        }

        let spec_clone = self
            .start_update(
                registry,
                VolumeOperation::Retype(RetypeOperation::new(
                    request.new_type.clone(),
                    Some(destination.clone()),
                    true,
                )),
            )
            .await?;

        // a retype migration is always a raw copy onto the new type, never a
        // native offload of the old placement
        let result = migration::migrate_generic(
            self,
            registry,
            &spec_clone,
            destination,
            Some(&request.new_type),
        )
        .await;
        let result = match result {
            Ok(()) => swap_type_quota(registry, &spec_clone, &new_type).await,
            Err(error) => Err(error),
        };
        self.complete_update(registry, result, spec_clone).await
    }
}

/// Move the volume's per-type quota accounting onto the new type. Called only
/// after the driver retype or the migration has succeeded; an over-quota
/// failure here fails the retype, whose envelope restores the record.
async fn swap_type_quota(
    registry: &Registry,
    spec: &VolumeSpec,
    new_type: &VolumeTypeSpec,
) -> Result<(), SvcError> {
    let deltas =
        QuotaDeltas::default().retype(spec.size, spec.volume_type.as_ref(), &new_type.id);
    let token = registry.quotas().reserve(&spec.project, deltas).await?;
    if let Err(error) = registry.quotas().commit(token).await {
        tracing::error!(
            volume.uuid = %spec.uuid,
            error = %error,
            "Failed to commit the retype quota reservation"
        );
    }
    Ok(())
}

#[async_trait::async_trait]
impl ResourceSnapshotting for OperationGuardArc<VolumeSpec> {
    type CreateSnap = CreateSnapshot;
    type CreateSnapOutput = SnapshotSpec;
    type DestroySnap = DestroySnapshot;

    async fn create_snap(
        &mut self,
        registry: &Registry,
        request: &Self::CreateSnap,
    ) -> Result<Self::CreateSnapOutput, SvcError> {
        let spec = self.as_ref().clone();
        if spec.status != VolumeStatus::Available && spec.status != VolumeStatus::InUse {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                reason: "snapshots require an available or in-use volume".to_string(),
            });
        }
        let mut snapshot = SnapshotSpec {
            uuid: request.uuid.clone(),
            volume: spec.uuid.clone(),
            size: spec.size,
            status: SnapshotStatus::Creating,
        };
        registry.store_obj(&snapshot).await?;
        registry.specs().insert_snapshot(snapshot.clone());

        let result = async {
            let driver = registry.backend(spec.host.backend())?;
            driver.create_snapshot(&spec, &snapshot).await
        }
        .await;
        match result {
            Ok(()) => {
                snapshot.status = SnapshotStatus::Available;
                registry.store_obj(&snapshot).await?;
                registry.specs().insert_snapshot(snapshot.clone());
                Ok(snapshot)
            }
            Err(error) => {
                registry.delete_kv(&snapshot.key().key()).await.ok();
                registry.specs().remove_snapshot(&snapshot.uuid);
                Err(error)
            }
        }
    }

    async fn destroy_snap(
        &mut self,
        registry: &Registry,
        request: &Self::DestroySnap,
    ) -> Result<(), SvcError> {
        let snapshot = registry.specs().snapshot(&request.uuid)?;
        let spec = self.as_ref().clone();
        let driver = registry.backend(spec.host.backend())?;
        driver.delete_snapshot(&snapshot).await?;
        registry.delete_kv(&snapshot.key().key()).await?;
        registry.specs().remove_snapshot(&snapshot.uuid);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResourceManagement for OperationGuardArc<VolumeSpec> {
    type Manage = ManageVolume;
    type ManageOutput = Self;

    async fn manage(
        registry: &Registry,
        request: &Self::Manage,
    ) -> Result<Self::ManageOutput, SvcError> {
        let create = CreateVolume {
            uuid: request.uuid.clone(),
            size: request.size,
            host: request.host.clone(),
            project: request.project.clone(),
            volume_type: request.volume_type.clone(),
            source: VolumeContentSource::None,
            multiattach: false,
        };
        let volume = registry
            .specs()
            .get_or_create_volume(&create)
            .operation_guard_wait()
            .await?;
        let volume_clone = volume.start_create(registry, &create).await?;

        let mut store = FlowStore::new();
        store.put(keys::VOLUME, volume_clone.clone());
        store.put(keys::EXISTING_REF, request.existing_ref.clone());
        let result = manage_volume_flow().run(registry, &mut store).await;
        if result.is_ok() {
            let mut spec = volume.lock();
            apply_model(&mut store, &mut spec);
        }

        // an adoption that failed must not keep a record around: the backend
        // volume keeps existing unmanaged
        volume
            .complete_create(result, registry, OnCreateFail::Delete)
            .await?;
        Ok(volume)
    }
}
