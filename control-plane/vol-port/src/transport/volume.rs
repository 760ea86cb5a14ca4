use super::*;

use crate::{impl_string_id, impl_string_id_inner, impl_string_uuid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

impl_string_uuid!(VolumeId, "UUID of a volume");
impl_string_uuid!(SnapshotId, "UUID of a volume snapshot");
impl_string_uuid!(AttachmentId, "UUID of a volume attachment");
impl_string_id!(VolumeTypeId, "Identifier of a volume type");
impl_string_id!(ProjectId, "Identifier of the tenant project owning a resource");
impl_string_id!(BackendName, "Name of a storage backend");

/// Operational state of a volume record.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VolumeStatus {
    /// The volume record exists but the backend volume is still being built.
    #[default]
    Creating,
    /// Ready for use, not attached to any consumer.
    Available,
    /// Attached to at least one consumer.
    InUse,
    /// An operation on the volume failed and left it unusable.
    Error,
    /// The volume is being deleted.
    Deleting,
    /// A retype is changing the volume's type, possibly moving its data.
    Retyping,
    /// Administratively fenced from user operations.
    Maintenance,
}

impl VolumeStatus {
    /// Statuses from which a volume may be deleted without further guards.
    /// Mid-migration statuses are included: a migration target or a stuck
    /// migration source can always be disposed of.
    pub fn deletable(&self) -> bool {
        matches!(
            self,
            Self::Available | Self::Error | Self::Creating | Self::Maintenance
        )
    }
}

/// The migration state machine of a volume record, orthogonal to its
/// operational `VolumeStatus`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// No migration in flight.
    #[default]
    None,
    /// Data is being moved to another backend.
    Migrating,
    /// Data has been moved and the identity swap is in progress.
    Completing,
    /// The last migration completed.
    Success,
    /// The last migration failed.
    Error,
    /// This record is the not-yet-finalised destination for the migration of
    /// the contained volume. It is never user-visible as a target of further
    /// operations.
    Target(VolumeId),
}

impl MigrationStatus {
    /// True while a migration is making progress on this record.
    pub fn in_flight(&self) -> bool {
        matches!(self, Self::Migrating | Self::Completing | Self::Target(_))
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Migrating => write!(f, "migrating"),
            Self::Completing => write!(f, "completing"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Target(source) => write!(f, "target:{}", source),
        }
    }
}

/// Replication state as reported by the owning backend.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReplicationStatus {
    /// Replication is not configured.
    #[default]
    Disabled,
    /// Replication is configured and healthy.
    Enabled,
    /// Replication is configured but not healthy.
    Error,
}

/// Access mode of an attachment.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, Default,
)]
pub enum AttachMode {
    /// Read-write access.
    #[default]
    #[serde(rename = "rw")]
    #[strum(serialize = "rw")]
    ReadWrite,
    /// Read-only access.
    #[serde(rename = "ro")]
    #[strum(serialize = "ro")]
    ReadOnly,
}

/// Whether a retype is allowed to move the volume's data to another backend.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// Migrate when the new type cannot be satisfied in place.
    #[default]
    OnDemand,
    /// Fail rather than move data.
    Never,
}

/// Locator of a backend placement, printed as `host@backend#pool`.
/// The pool component is optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HostLocator {
    host: String,
    backend: BackendName,
    pool: Option<String>,
}

impl HostLocator {
    /// Build a locator from its components.
    pub fn new(host: impl Into<String>, backend: impl Into<String>, pool: Option<String>) -> Self {
        Self {
            host: host.into(),
            backend: BackendName::from(backend.into()),
            pool,
        }
    }
    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }
    /// The backend component.
    pub fn backend(&self) -> &BackendName {
        &self.backend
    }
    /// The pool component, if any.
    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }
    /// Check whether two locators resolve to the same backend placement.
    pub fn same_backend(&self, other: &Self) -> bool {
        self.host == other.host && self.backend == other.backend
    }
}

impl std::fmt::Display for HostLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pool {
            Some(pool) => write!(f, "{}@{}#{}", self.host, self.backend, pool),
            None => write!(f, "{}@{}", self.host, self.backend),
        }
    }
}

impl FromStr for HostLocator {
    type Err = String;

    fn from_str(locator: &str) -> Result<Self, Self::Err> {
        let (host, rest) = locator
            .split_once('@')
            .ok_or_else(|| format!("Invalid host locator '{locator}': missing '@'"))?;
        let (backend, pool) = match rest.split_once('#') {
            Some((backend, pool)) => (backend, Some(pool.to_string())),
            None => (rest, None),
        };
        if host.is_empty() || backend.is_empty() {
            return Err(format!("Invalid host locator '{locator}'"));
        }
        Ok(Self::new(host, backend, pool))
    }
}

impl Serialize for HostLocator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HostLocator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let locator = String::deserialize(deserializer)?;
        locator.parse().map_err(serde::de::Error::custom)
    }
}

/// Where the content of a new volume comes from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumeContentSource {
    /// Blank volume.
    #[default]
    None,
    /// Built from a snapshot of another volume.
    Snapshot(SnapshotId),
    /// Cloned from another volume.
    Clone(VolumeId),
}

impl VolumeContentSource {
    /// True when the volume descends from another volume's data.
    pub fn is_chained(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Create volume request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CreateVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The size of the volume in GiB.
    pub size: u64,
    /// The placement of the volume.
    pub host: HostLocator,
    /// The owning project.
    pub project: ProjectId,
    /// The requested volume type.
    pub volume_type: Option<VolumeTypeId>,
    /// The content source.
    pub source: VolumeContentSource,
    /// Allow more than one concurrent attachment.
    pub multiattach: bool,
}

/// Delete volume request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DestroyVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
}

/// Extend volume request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExtendVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The new size in GiB, strictly larger than the current size.
    pub new_size: u64,
}

/// Attach a volume to a consumer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AttachVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The consuming instance, if any.
    pub instance_uuid: Option<String>,
    /// The consuming host, if any.
    pub attached_host: Option<String>,
    /// Where the consumer mounts the volume.
    pub mountpoint: String,
    /// Requested access mode.
    pub mode: AttachMode,
}

/// Detach a volume from a consumer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetachVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The attachment to remove.
    pub attachment: AttachmentId,
}

/// Migrate a volume's data to another backend placement.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrateVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// Where the data should land.
    pub destination: HostLocator,
    /// Skip the native driver offload and always copy bytes.
    pub force_copy: bool,
}

/// Change a volume's type, possibly moving its data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetypeVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The new volume type.
    pub new_type: VolumeTypeId,
    /// Explicit destination placement, when the scheduler resolved one.
    pub destination: Option<HostLocator>,
    /// Whether data movement is permitted.
    pub policy: MigrationPolicy,
}

/// Bring an existing backend volume under management.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ManageVolume {
    /// The uuid the managed volume record will get.
    pub uuid: VolumeId,
    /// The placement of the existing volume.
    pub host: HostLocator,
    /// Backend-specific reference to the existing volume.
    pub existing_ref: String,
    /// The size of the existing volume in GiB.
    pub size: u64,
    /// The owning project.
    pub project: ProjectId,
    /// The volume type to account the volume under.
    pub volume_type: Option<VolumeTypeId>,
}

/// Create a snapshot of a volume.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateSnapshot {
    /// The uuid of the snapshot.
    pub uuid: SnapshotId,
    /// The volume to snapshot.
    pub volume: VolumeId,
}

/// Delete a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DestroySnapshot {
    /// The uuid of the snapshot.
    pub uuid: SnapshotId,
}
