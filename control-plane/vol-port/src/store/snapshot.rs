//! Definition of snapshot types that can be saved to the persistent store.

use crate::transport::{SnapshotId, VolumeId};
use memstor::{ObjectKey, StorableObject, StorableObjectType};
use serde::{Deserialize, Serialize};

/// State of a snapshot record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// The snapshot is being taken.
    #[default]
    Creating,
    /// Ready for use.
    Available,
    /// A snapshot operation failed.
    Error,
}

/// The persisted record of a point-in-time snapshot of a volume. Snapshots
/// are mutated under their volume's operation guard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SnapshotSpec {
    /// Snapshot Id.
    pub uuid: SnapshotId,
    /// The snapped volume.
    pub volume: VolumeId,
    /// Size of the snapped volume in GiB.
    pub size: u64,
    /// State of the snapshot.
    pub status: SnapshotStatus,
}

/// Key used by the store to uniquely identify a SnapshotSpec structure.
pub struct SnapshotSpecKey(SnapshotId);

impl From<&SnapshotId> for SnapshotSpecKey {
    fn from(id: &SnapshotId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for SnapshotSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::SnapshotSpec
    }

    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for SnapshotSpec {
    type Key = SnapshotSpecKey;

    fn key(&self) -> Self::Key {
        SnapshotSpecKey(self.uuid.clone())
    }
}
