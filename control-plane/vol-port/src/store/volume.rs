//! Definition of volume types that can be saved to the persistent store.

use crate::{
    store::{AsOperationSequencer, OperationSequence, SpecTransaction},
    transport::{
        AttachmentId, CreateVolume, HostLocator, MigrationStatus, ProjectId, ReplicationStatus,
        VolumeContentSource, VolumeId, VolumeStatus, VolumeTypeId,
    },
};
use memstor::{ObjectKey, StorableObject, StorableObjectType};
use serde::{Deserialize, Serialize};

/// The persisted record of a volume: its operational status, the orthogonal
/// migration state machine, and the placement owned by its backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct VolumeSpec {
    /// Volume Id.
    pub uuid: VolumeId,
    /// Size that the volume should be, in GiB.
    pub size: u64,
    /// Operational status of the volume.
    pub status: VolumeStatus,
    /// Snapshot of `status` taken before entering a transient state, restored
    /// on completion or failure.
    pub previous_status: Option<VolumeStatus>,
    /// In-flight migration state of this record.
    #[serde(default)]
    pub migration: MigrationStatus,
    /// Backend placement, format `host@backend#pool`.
    pub host: HostLocator,
    /// The owning project.
    pub project: ProjectId,
    /// The volume type, carrying backend-selection extra-specs.
    pub volume_type: Option<VolumeTypeId>,
    /// Opaque backend-specific locator, owned exclusively by the backend
    /// driver.
    #[serde(default)]
    pub provider_location: Option<String>,
    /// Replication state reported by the backend.
    #[serde(default)]
    pub replication_status: ReplicationStatus,
    /// Where the volume's content came from.
    #[serde(default)]
    pub source: VolumeContentSource,
    /// Allow more than one concurrent attachment.
    #[serde(default)]
    pub multiattach: bool,
    /// Update of the record in progress.
    #[serde(skip)]
    pub sequencer: OperationSequence,
    /// Record of the operation in progress.
    pub operation: Option<VolumeOperationState>,
}

impl AsOperationSequencer for VolumeSpec {
    fn as_ref(&self) -> &OperationSequence {
        &self.sequencer
    }

    fn as_mut(&mut self) -> &mut OperationSequence {
        &mut self.sequencer
    }
}

impl VolumeSpec {
    /// True when this record is the not-yet-finalised destination of another
    /// volume's migration.
    pub fn is_migration_target(&self) -> bool {
        matches!(self.migration, MigrationStatus::Target(_))
    }
    /// The record's status, remembered so a transient state can be unwound.
    pub fn stash_status(&mut self, transient: VolumeStatus) {
        self.previous_status = Some(self.status);
        self.status = transient;
    }
    /// Restore the status stashed before a transient state, if any.
    pub fn restore_status(&mut self) {
        if let Some(previous) = self.previous_status.take() {
            self.status = previous;
        }
    }
}

/// Operation State for a volume spec resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeOperationState {
    /// Record of the operation.
    pub operation: VolumeOperation,
    /// Result of the operation.
    pub result: Option<bool>,
}

/// Available Volume Operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum VolumeOperation {
    Create,
    Destroy,
    Attach(AttachOperation),
    Detach(DetachOperation),
    Extend(u64),
    Migrate(MigrateOperation),
    Retype(RetypeOperation),
    SetVolumeType(VolumeTypeId),
}

/// Volume attach operation parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttachOperation {
    attachment: AttachmentId,
}
impl AttachOperation {
    /// Return new `Self` from the given parameters.
    pub fn new(attachment: AttachmentId) -> Self {
        Self { attachment }
    }
    /// The attachment being created.
    pub fn attachment(&self) -> &AttachmentId {
        &self.attachment
    }
}

/// Volume detach operation parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetachOperation {
    attachment: AttachmentId,
    last: bool,
}
impl DetachOperation {
    /// Return new `Self` from the given parameters.
    pub fn new(attachment: AttachmentId, last: bool) -> Self {
        Self { attachment, last }
    }
    /// The attachment being removed.
    pub fn attachment(&self) -> &AttachmentId {
        &self.attachment
    }
    /// Whether this is the volume's last attachment.
    pub fn last(&self) -> bool {
        self.last
    }
}

/// Volume migrate operation parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrateOperation {
    destination: HostLocator,
}
impl MigrateOperation {
    /// Return new `Self` from the given parameters.
    pub fn new(destination: HostLocator) -> Self {
        Self { destination }
    }
    /// Where the data is being moved to.
    pub fn destination(&self) -> &HostLocator {
        &self.destination
    }
}

/// Volume retype operation parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetypeOperation {
    new_type: VolumeTypeId,
    destination: Option<HostLocator>,
    migrate: bool,
}
impl RetypeOperation {
    /// Return new `Self` from the given parameters.
    pub fn new(new_type: VolumeTypeId, destination: Option<HostLocator>, migrate: bool) -> Self {
        Self {
            new_type,
            destination,
            migrate,
        }
    }
    /// The type the volume is moving to.
    pub fn new_type(&self) -> &VolumeTypeId {
        &self.new_type
    }
    /// The resolved destination placement, if the retype moves data.
    pub fn destination(&self) -> Option<&HostLocator> {
        self.destination.as_ref()
    }
    /// Whether the retype moves the volume's data.
    pub fn migrate(&self) -> bool {
        self.migrate
    }
}

impl SpecTransaction<VolumeOperation> for VolumeSpec {
    fn pending_op(&self) -> bool {
        self.operation.is_some()
    }

    fn commit_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                VolumeOperation::Create => {
                    self.status = VolumeStatus::Available;
                }
                VolumeOperation::Destroy => {
                    self.status = VolumeStatus::Deleting;
                }
                VolumeOperation::Attach(_) => {
                    self.status = VolumeStatus::InUse;
                }
                VolumeOperation::Detach(detach) => {
                    if detach.last() {
                        self.status = VolumeStatus::Available;
                    }
                }
                VolumeOperation::Extend(size) => {
                    self.size = size;
                }
                VolumeOperation::Migrate(migrate) => {
                    self.host = migrate.destination().clone();
                    self.migration = MigrationStatus::Success;
                }
                VolumeOperation::Retype(retype) => {
                    self.volume_type = Some(retype.new_type().clone());
                    if let Some(destination) = retype.destination() {
                        self.host = destination.clone();
                    }
                    if retype.migrate() {
                        self.migration = MigrationStatus::Success;
                    }
                    self.restore_status();
                }
                VolumeOperation::SetVolumeType(new_type) => {
                    self.volume_type = Some(new_type);
                }
            }
        }
        self.operation = None;
    }

    fn clear_op(&mut self) {
        if let Some(op) = self.operation.take() {
            match op.operation {
                VolumeOperation::Destroy => {
                    self.status = VolumeStatus::Error;
                }
                VolumeOperation::Migrate(_) => {
                    self.migration = MigrationStatus::Error;
                }
                VolumeOperation::Retype(retype) => {
                    if retype.migrate() {
                        self.migration = MigrationStatus::Error;
                    }
                    self.restore_status();
                }
                _ => {}
            }
        }
    }

    fn start_op(&mut self, operation: VolumeOperation) {
        match &operation {
            VolumeOperation::Destroy => {
                self.status = VolumeStatus::Deleting;
            }
            VolumeOperation::Migrate(_) => {
                self.migration = MigrationStatus::Migrating;
            }
            VolumeOperation::Retype(retype) => {
                self.stash_status(VolumeStatus::Retyping);
                if retype.migrate() {
                    self.migration = MigrationStatus::Migrating;
                }
            }
            _ => {}
        }
        self.operation = Some(VolumeOperationState {
            operation,
            result: None,
        })
    }

    fn set_op_result(&mut self, result: bool) {
        if let Some(op) = &mut self.operation {
            op.result = Some(result);
        }
    }
}

/// Key used by the store to uniquely identify a VolumeSpec structure.
pub struct VolumeSpecKey(VolumeId);

impl From<&VolumeId> for VolumeSpecKey {
    fn from(id: &VolumeId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for VolumeSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::VolumeSpec
    }

    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for VolumeSpec {
    type Key = VolumeSpecKey;

    fn key(&self) -> Self::Key {
        VolumeSpecKey(self.uuid.clone())
    }
}

impl From<&CreateVolume> for VolumeSpec {
    fn from(request: &CreateVolume) -> Self {
        Self {
            uuid: request.uuid.clone(),
            size: request.size,
            status: VolumeStatus::Creating,
            previous_status: None,
            migration: MigrationStatus::None,
            host: request.host.clone(),
            project: request.project.clone(),
            volume_type: request.volume_type.clone(),
            provider_location: None,
            replication_status: ReplicationStatus::Disabled,
            source: request.source.clone(),
            multiattach: request.multiattach,
            sequencer: OperationSequence::new(request.uuid.clone()),
            operation: None,
        }
    }
}
impl PartialEq<CreateVolume> for VolumeSpec {
    fn eq(&self, other: &CreateVolume) -> bool {
        let mut other = VolumeSpec::from(other);
        other.status = self.status;
        other.sequencer = self.sequencer.clone();
        &other == self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spec() -> VolumeSpec {
        VolumeSpec {
            uuid: VolumeId::new(),
            size: 10,
            status: VolumeStatus::Available,
            host: "node-1@alpha#pool-a".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn migrate_op_transitions() {
        let mut spec = test_spec();
        let destination: HostLocator = "node-2@beta#pool-b".parse().unwrap();
        spec.start_op(VolumeOperation::Migrate(MigrateOperation::new(
            destination.clone(),
        )));
        assert_eq!(spec.migration, MigrationStatus::Migrating);
        assert_eq!(spec.status, VolumeStatus::Available);

        let mut failed = spec.clone();
        failed.clear_op();
        assert_eq!(failed.migration, MigrationStatus::Error);
        assert_eq!(failed.status, VolumeStatus::Available);
        assert!(!failed.pending_op());

        spec.commit_op();
        assert_eq!(spec.migration, MigrationStatus::Success);
        assert_eq!(spec.host, destination);
        assert!(!spec.pending_op());
    }

    #[test]
    fn retype_op_transitions() {
        let mut spec = test_spec();
        spec.start_op(VolumeOperation::Retype(RetypeOperation::new(
            VolumeTypeId::from("gold"),
            None,
            false,
        )));
        assert_eq!(spec.status, VolumeStatus::Retyping);
        assert_eq!(spec.previous_status, Some(VolumeStatus::Available));

        let mut failed = spec.clone();
        failed.clear_op();
        assert_eq!(failed.status, VolumeStatus::Available);
        assert_eq!(failed.migration, MigrationStatus::None);

        spec.commit_op();
        assert_eq!(spec.status, VolumeStatus::Available);
        assert_eq!(spec.volume_type, Some(VolumeTypeId::from("gold")));
    }
}
