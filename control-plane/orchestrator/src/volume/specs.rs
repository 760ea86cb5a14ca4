//! Volume spec helpers: the state checks behind the guarded operations, and
//! the registry-wide lookups used across the volume operations.

use crate::{
    controller::{
        registry::Registry,
        resources::{
            operations_helper::{
                GuardedOperationsHelper, OperationSequenceGuard, ResourceSpecsLocked,
                SpecOperationsHelper,
            },
            OperationGuardArc, ResourceMutex,
        },
    },
    SvcError,
};
use vol_port::{
    store::{
        attachment::AttachmentSpec,
        snapshot::SnapshotSpec,
        volume::{VolumeOperation, VolumeSpec},
        volume_type::VolumeTypeSpec,
        SpecTransaction,
    },
    transport::{
        AttachmentId, CreateVolume, ResourceKind, SnapshotId, VolumeId, VolumeStatus, VolumeTypeId,
    },
};

impl SpecOperationsHelper for VolumeSpec {
    type Create = CreateVolume;
    type UpdateOp = VolumeOperation;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }
    fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }
    fn creating(&self) -> bool {
        self.status == VolumeStatus::Creating
    }
    fn deleting(&self) -> bool {
        self.status == VolumeStatus::Deleting
    }
    fn start_create_op(&mut self) {
        self.start_op(VolumeOperation::Create);
    }
    fn start_destroy_op(&mut self) {
        self.start_op(VolumeOperation::Destroy);
    }
    fn fail_creating(&mut self) {
        self.clear_op();
        self.status = VolumeStatus::Error;
    }
    fn operation_result(&self) -> Option<Option<bool>> {
        self.operation.as_ref().map(|op| op.result)
    }
    fn start_update_op(&mut self, operation: Self::UpdateOp) -> Result<(), SvcError> {
        self.validate_transition(&operation)?;
        self.start_op(operation);
        Ok(())
    }
}

/// State checks gating each update operation.
trait ValidateTransition {
    fn validate_transition(&self, operation: &VolumeOperation) -> Result<(), SvcError>;
}

impl ValidateTransition for VolumeSpec {
    fn validate_transition(&self, operation: &VolumeOperation) -> Result<(), SvcError> {
        let invalid = |reason: &str| {
            Err(SvcError::InvalidVolume {
                vol_id: self.uuid.to_string(),
                reason: reason.to_string(),
            })
        };
        match operation {
            VolumeOperation::Attach(_) => match self.status {
                VolumeStatus::Available => Ok(()),
                VolumeStatus::InUse if self.multiattach => Ok(()),
                VolumeStatus::InUse => invalid("already attached and not multiattach"),
                _ => invalid("not attachable in its current status"),
            },
            VolumeOperation::Detach(_) => match self.status {
                VolumeStatus::InUse => Ok(()),
                _ => invalid("not attached"),
            },
            VolumeOperation::Extend(new_size) => {
                if self.status != VolumeStatus::Available {
                    return invalid("only an available volume can be extended");
                }
                if *new_size <= self.size {
                    return Err(SvcError::InvalidArguments {});
                }
                Ok(())
            }
            VolumeOperation::Migrate(_) => {
                if self.is_migration_target() {
                    return invalid("record is a migration target");
                }
                if self.migration.in_flight() {
                    return invalid("a migration is already in flight");
                }
                match self.status {
                    VolumeStatus::Available | VolumeStatus::InUse => Ok(()),
                    _ => invalid("only an available or in-use volume can be migrated"),
                }
            }
            VolumeOperation::Retype(_) | VolumeOperation::SetVolumeType(_) => {
                if self.is_migration_target() {
                    return invalid("record is a migration target");
                }
                if self.migration.in_flight() {
                    return invalid("a migration is already in flight");
                }
                match self.status {
                    VolumeStatus::Available => Ok(()),
                    _ => invalid("only an available volume can be retyped"),
                }
            }
            VolumeOperation::Create | VolumeOperation::Destroy => Err(SvcError::Internal {
                details: "create/destroy are not update operations".to_string(),
            }),
        }
    }
}

impl GuardedOperationsHelper for OperationGuardArc<VolumeSpec> {
    type Create = CreateVolume;
    type UpdateOp = VolumeOperation;
    type Inner = VolumeSpec;

    fn remove_spec(&self, registry: &Registry) {
        let uuid = self.lock().uuid.clone();
        registry.specs().remove_volume(&uuid);
    }

    fn validate_destroy(&self, registry: &Registry) -> Result<(), SvcError> {
        let spec = self.lock().clone();
        // mid-migration records (a stuck source or a target sentinel) can
        // always be disposed of without further guards
        if !spec.status.deletable() && !spec.migration.in_flight() {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                reason: format!("cannot be deleted in status '{}'", spec.status),
            });
        }
        if !registry.specs().volume_attachments(&spec.uuid).is_empty() {
            return Err(SvcError::InUse {
                kind: ResourceKind::Volume,
                id: spec.uuid.to_string(),
            });
        }
        if !registry.specs().volume_snapshots(&spec.uuid).is_empty() {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                reason: "volume has snapshots".to_string(),
            });
        }
        Ok(())
    }
}

impl ResourceSpecsLocked {
    /// Get a copy of the volume's `ResourceMutex`.
    pub fn volume_rsc(&self, id: &VolumeId) -> Result<ResourceMutex<VolumeSpec>, SvcError> {
        self.read()
            .volumes
            .get(id)
            .cloned()
            .ok_or(SvcError::VolumeNotFound {
                vol_id: id.to_string(),
            })
    }

    /// Get an exclusive operation guard for the volume.
    pub async fn volume(&self, id: &VolumeId) -> Result<OperationGuardArc<VolumeSpec>, SvcError> {
        self.volume_rsc(id)?.operation_guard_wait().await
    }

    /// Get a snapshot of the volume's current record.
    pub fn volume_clone(&self, id: &VolumeId) -> Result<VolumeSpec, SvcError> {
        Ok(self.volume_rsc(id)?.lock().clone())
    }

    /// Get snapshots of all volume records.
    pub fn volumes(&self) -> Vec<VolumeSpec> {
        self.read()
            .volumes
            .values()
            .map(|volume| volume.lock().clone())
            .collect()
    }

    /// Get the volume for the given request, or create its record in the
    /// `Creating` state if there is none yet.
    pub fn get_or_create_volume(&self, request: &CreateVolume) -> ResourceMutex<VolumeSpec> {
        let mut specs = self.write();
        match specs.volumes.get(&request.uuid) {
            Some(volume) => volume.clone(),
            None => specs.volumes.insert(VolumeSpec::from(request)),
        }
    }

    /// Insert a volume record.
    pub fn insert_volume(&self, spec: VolumeSpec) -> ResourceMutex<VolumeSpec> {
        self.write().volumes.insert(spec)
    }

    /// Forget a volume record.
    pub fn remove_volume(&self, id: &VolumeId) {
        self.write().volumes.remove(id);
    }

    /// All attachments bound to the volume.
    pub fn volume_attachments(&self, id: &VolumeId) -> Vec<AttachmentSpec> {
        self.read()
            .attachments
            .values()
            .map(|attachment| attachment.lock().clone())
            .filter(|attachment| &attachment.volume == id)
            .collect()
    }

    /// Get an attachment record.
    pub fn attachment(&self, id: &AttachmentId) -> Result<AttachmentSpec, SvcError> {
        self.read()
            .attachments
            .get(id)
            .map(|attachment| attachment.lock().clone())
            .ok_or(SvcError::NotFound {
                kind: ResourceKind::Attachment,
                id: id.to_string(),
            })
    }

    /// Insert an attachment record.
    pub fn insert_attachment(&self, attachment: AttachmentSpec) {
        self.write().attachments.insert(attachment);
    }

    /// Forget an attachment record.
    pub fn remove_attachment(&self, id: &AttachmentId) {
        self.write().attachments.remove(id);
    }

    /// All snapshots taken of the volume.
    pub fn volume_snapshots(&self, id: &VolumeId) -> Vec<SnapshotSpec> {
        self.read()
            .snapshots
            .values()
            .map(|snapshot| snapshot.lock().clone())
            .filter(|snapshot| &snapshot.volume == id)
            .collect()
    }

    /// Get a snapshot record.
    pub fn snapshot(&self, id: &SnapshotId) -> Result<SnapshotSpec, SvcError> {
        self.read()
            .snapshots
            .get(id)
            .map(|snapshot| snapshot.lock().clone())
            .ok_or(SvcError::SnapshotNotFound {
                snap_id: id.to_string(),
            })
    }

    /// Insert a snapshot record.
    pub fn insert_snapshot(&self, snapshot: SnapshotSpec) {
        self.write().snapshots.insert(snapshot);
    }

    /// Forget a snapshot record.
    pub fn remove_snapshot(&self, id: &SnapshotId) {
        self.write().snapshots.remove(id);
    }

    /// Get a volume type record.
    pub fn volume_type(&self, id: &VolumeTypeId) -> Result<VolumeTypeSpec, SvcError> {
        self.read()
            .volume_types
            .get(id)
            .map(|volume_type| volume_type.lock().clone())
            .ok_or(SvcError::VolumeTypeNotFound {
                type_id: id.to_string(),
            })
    }

    /// Insert a volume type record.
    pub fn insert_volume_type(&self, volume_type: VolumeTypeSpec) {
        self.write().volume_types.insert(volume_type);
    }
}
