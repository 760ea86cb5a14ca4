//! The generic migration path: byte-copy a volume's data between two
//! backends when neither can move it natively, then swap the surviving
//! record's identity onto the new placement.
//!
//! Failure anywhere in this path leaves the source volume restored to its
//! pre-migration status with `migration = Error`, and best-effort removes the
//! half-created destination; the failure itself always propagates.

use crate::{
    backend::{ConnectorProperties, MigrateOutcome, ModelUpdate},
    controller::{
        registry::Registry,
        resources::{operations_helper::SpecOperationsHelper, OperationGuardArc},
    },
    copy::{self, CopyParams},
    SvcError,
};
use memstor::{ObjectKey, StorableObject};
use vol_port::{
    store::{
        volume::{VolumeOperation, VolumeSpec},
        OperationSequence, SpecTransaction,
    },
    transport::{HostLocator, MigrationStatus, VolumeId, VolumeStatus, VolumeTypeId},
    ErrorChain,
};

/// Move the volume's data to `destination`: natively when the serving driver
/// offers it, through the generic copy path otherwise.
pub(crate) async fn migrate_data(
    volume: &mut OperationGuardArc<VolumeSpec>,
    registry: &Registry,
    spec_clone: &VolumeSpec,
    destination: &HostLocator,
    force_copy: bool,
) -> Result<(), SvcError> {
    let driver = registry.backend(spec_clone.host.backend())?;
    if !force_copy {
        match driver.migrate_volume(spec_clone, destination).await? {
            MigrateOutcome::Moved(model) => {
                let mut spec = volume.lock();
                model.apply(&mut spec);
                return Ok(());
            }
            MigrateOutcome::Declined => {}
        }
    }
    migrate_generic(volume, registry, spec_clone, destination, None).await
}

/// The generic copy migration: create a destination record flagged as this
/// volume's migration target, wait for its backend volume to come online,
/// copy the bytes, then complete the swap.
pub(crate) async fn migrate_generic(
    volume: &mut OperationGuardArc<VolumeSpec>,
    registry: &Registry,
    spec_clone: &VolumeSpec,
    destination: &HostLocator,
    new_type: Option<&VolumeTypeId>,
) -> Result<(), SvcError> {
    let mut new_spec = destination_spec(spec_clone, destination);
    if let Some(new_type) = new_type {
        new_spec.volume_type = Some(new_type.clone());
    }
    let new_spec = create_migration_target(registry, spec_clone, new_spec).await?;

    match copy_volume_data(registry, spec_clone, &new_spec).await {
        Ok(()) => migrate_volume_completion(volume, registry, spec_clone, &new_spec).await,
        Err(error) => {
            cleanup_destination(registry, &new_spec).await;
            Err(error)
        }
    }
}

/// The record of the migration destination: same shape as the source, placed
/// on the destination backend and flagged with the target sentinel. The
/// source's snapshot or clone ancestry is never replayed on the new backend,
/// only a raw copy is made.
fn destination_spec(source: &VolumeSpec, destination: &HostLocator) -> VolumeSpec {
    let uuid = VolumeId::new();
    VolumeSpec {
        uuid: uuid.clone(),
        size: source.size,
        status: VolumeStatus::Creating,
        previous_status: None,
        migration: MigrationStatus::Target(source.uuid.clone()),
        host: destination.clone(),
        project: source.project.clone(),
        volume_type: source.volume_type.clone(),
        provider_location: None,
        replication_status: Default::default(),
        source: Default::default(),
        multiattach: source.multiattach,
        sequencer: OperationSequence::new(uuid),
        operation: None,
    }
}

/// Create the destination record and ask its backend to allocate the volume.
/// The driver call completes asynchronously; completion is observed by
/// polling the record with a bounded fixed-interval wait.
async fn create_migration_target(
    registry: &Registry,
    source: &VolumeSpec,
    mut new_spec: VolumeSpec,
) -> Result<VolumeSpec, SvcError> {
    new_spec.start_op(VolumeOperation::Create);
    registry.specs().insert_volume(new_spec.clone());
    if let Err(error) = registry.store_obj(&new_spec).await {
        registry.specs().remove_volume(&new_spec.uuid);
        return Err(error);
    }

    let task_registry = registry.clone();
    let task_spec = new_spec.clone();
    tokio::spawn(async move {
        let result = create_on_backend(&task_registry, &task_spec).await;
        finish_target_create(&task_registry, &task_spec, result).await;
    });

    match wait_target_available(registry, source, &new_spec).await {
        Ok(new_spec) => Ok(new_spec),
        Err(error) => {
            cleanup_destination(registry, &new_spec).await;
            Err(error)
        }
    }
}

/// Allocate the destination volume on its backend.
async fn create_on_backend(
    registry: &Registry,
    spec: &VolumeSpec,
) -> Result<ModelUpdate, SvcError> {
    let driver = registry.backend(spec.host.backend())?;
    if !driver.ready() {
        return Err(SvcError::DriverNotInitialized {
            backend: spec.host.backend().to_string(),
        });
    }
    driver.create_volume(spec).await
}

/// Fold the backend allocation result into the destination record. When the
/// migration has already given up waiting and disposed of the record, undo
/// the allocation instead.
async fn finish_target_create(
    registry: &Registry,
    spec: &VolumeSpec,
    result: Result<ModelUpdate, SvcError>,
) {
    let Ok(volume) = registry.specs().volume_rsc(&spec.uuid) else {
        if result.is_ok() {
            if let Ok(driver) = registry.backend(spec.host.backend()) {
                driver.delete_volume(spec).await.ok();
            }
        }
        return;
    };
    let updated = {
        let mut locked = volume.lock();
        match result {
            Ok(model) => {
                locked.commit_op();
                model.apply(&mut locked);
            }
            Err(error) => {
                tracing::error!(
                    volume.uuid = %spec.uuid,
                    error = error.full_string(),
                    "Failed to create the migration destination volume"
                );
                locked.fail_creating();
            }
        }
        locked.clone()
    };
    registry.store_obj(&updated).await.ok();
}

/// Poll the destination record with a fixed interval until it reaches
/// `Available`, bounded by the configured number of tries.
async fn wait_target_available(
    registry: &Registry,
    source: &VolumeSpec,
    new_spec: &VolumeSpec,
) -> Result<VolumeSpec, SvcError> {
    let period = registry.config().create_poll_period;
    let tries = registry.config().create_poll_tries;
    for _ in 0 .. tries {
        let current = registry.specs().volume_clone(&new_spec.uuid)?;
        match current.status {
            VolumeStatus::Available => return Ok(current),
            VolumeStatus::Creating => {}
            _ => {
                return Err(SvcError::MigrationFailed {
                    vol_id: source.uuid.to_string(),
                    reason: format!(
                        "destination volume '{}' failed to create",
                        new_spec.uuid
                    ),
                })
            }
        }
        tokio::time::sleep(period).await;
    }
    Err(SvcError::MigrationFailed {
        vol_id: source.uuid.to_string(),
        reason: format!(
            "timed out waiting for destination volume '{}' to become available",
            new_spec.uuid
        ),
    })
}

/// Attach both ends, stream the bytes across, detach both ends.
/// A live source volume is copied over its consumer's connector so the copy
/// follows the active path; an unattached one over this agent's connector.
async fn copy_volume_data(
    registry: &Registry,
    source: &VolumeSpec,
    target: &VolumeSpec,
) -> Result<(), SvcError> {
    let source_driver = registry.backend(source.host.backend())?;
    let target_driver = registry.backend(target.host.backend())?;

    let attachments = registry.specs().volume_attachments(&source.uuid);
    let connector = match attachments.iter().find_map(|a| a.attached_host.clone()) {
        Some(host) => ConnectorProperties::for_host(host),
        None => registry.connector().clone(),
    };
    let sparse = target_driver.get_capabilities().await?.sparse_copy_volume;

    let source_info = source_driver.attach_volume(source, &connector).await?;
    let target_info = match target_driver.attach_volume(target, &connector).await {
        Ok(info) => info,
        Err(error) => {
            source_driver.detach_volume(source, &connector).await.ok();
            return Err(error);
        }
    };

    let options = &registry.config().copy;
    let params = CopyParams::new(source.size * 1024, options.block_size.clone())
        .with_ionice(options.ionice.clone())
        .with_throttle(options.throttle.clone())
        .with_sparse(sparse);
    let result = copy::copy_volume(source_info.handle, target_info.handle, &params)
        .await
        .map_err(|source_error| SvcError::CopyFailed {
            vol_id: source.uuid.to_string(),
            source: source_error,
        });

    match result {
        Ok(()) => {
            // a detach failure after a clean copy fails the migration: the
            // completion swap must not run over a half-detached pair
            source_driver.detach_volume(source, &connector).await?;
            target_driver.detach_volume(target, &connector).await?;
            Ok(())
        }
        Err(error) => {
            source_driver.detach_volume(source, &connector).await.ok();
            target_driver.detach_volume(target, &connector).await.ok();
            Err(error)
        }
    }
}

/// Swap identities: the surviving record (the source uuid) takes over the new
/// backend volume, consumers are re-attached to it, and the old backend
/// volume is deleted. Any failure in this phase propagates after the caller
/// restores the record to a terminal state.
async fn migrate_volume_completion(
    volume: &mut OperationGuardArc<VolumeSpec>,
    registry: &Registry,
    spec_clone: &VolumeSpec,
    new_spec: &VolumeSpec,
) -> Result<(), SvcError> {
    let completing = {
        let mut spec = volume.lock();
        spec.migration = MigrationStatus::Completing;
        spec.clone()
    };
    registry.store_obj(&completing).await?;

    let source_driver = registry.backend(spec_clone.host.backend())?;
    let target_driver = registry.backend(new_spec.host.backend())?;

    // backend-specific identity fixup; drivers without one decline
    match target_driver
        .update_migrated_volume(spec_clone, new_spec)
        .await
    {
        Ok(()) | Err(SvcError::NotSupported { .. }) => {}
        Err(error) => return Err(error),
    }

    // swing live consumers over to the new backend volume, preserving the
    // attachment records untouched: the surviving volume id does not change
    for attachment in registry.specs().volume_attachments(&spec_clone.uuid) {
        let connector = match &attachment.attached_host {
            Some(host) => ConnectorProperties::for_host(host.clone()),
            None => registry.connector().clone(),
        };
        source_driver
            .detach_volume(spec_clone, &connector)
            .await?;
        target_driver.attach_volume(new_spec, &connector).await?;
    }

    // the old backend volume is no longer needed
    source_driver.delete_volume(spec_clone).await?;

    // the surviving record inherits the new placement's backend identity;
    // the host swap itself lands when the migrate operation commits
    {
        let mut spec = volume.lock();
        spec.provider_location = new_spec.provider_location.clone();
        spec.replication_status = new_spec.replication_status;
    }

    // dispose of the target sentinel record
    registry.delete_kv(&new_spec.key().key()).await?;
    registry.specs().remove_volume(&new_spec.uuid);
    Ok(())
}

/// Best-effort disposal of a half-created destination: the backend volume
/// first, then the record. Failures are logged and swallowed, the original
/// migration failure is what propagates.
async fn cleanup_destination(registry: &Registry, new_spec: &VolumeSpec) {
    if let Ok(driver) = registry.backend(new_spec.host.backend()) {
        if let Err(error) = driver.delete_volume(new_spec).await {
            tracing::warn!(
                volume.uuid = %new_spec.uuid,
                error = error.full_string(),
                "Failed to delete the half-created destination volume"
            );
        }
    }
    if let Err(error) = registry.delete_kv(&new_spec.key().key()).await {
        tracing::warn!(
            volume.uuid = %new_spec.uuid,
            error = error.full_string(),
            "Failed to delete the destination record from the store"
        );
    }
    registry.specs().remove_volume(&new_spec.uuid);
}
