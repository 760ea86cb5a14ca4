//! Definition of attachment types that can be saved to the persistent store.

use crate::transport::{AttachMode, AttachmentId, VolumeId};
use memstor::{ObjectKey, StorableObject, StorableObjectType};
use serde::{Deserialize, Serialize};

/// The persisted record of a volume bound to a consumer. Attachments are
/// always mutated under their volume's operation guard, so they carry no
/// sequencer of their own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AttachmentSpec {
    /// Attachment Id.
    pub id: AttachmentId,
    /// The attached volume.
    pub volume: VolumeId,
    /// The consuming instance, if any.
    pub instance_uuid: Option<String>,
    /// The consuming host, if any.
    pub attached_host: Option<String>,
    /// Where the consumer mounts the volume.
    pub mountpoint: String,
    /// Access mode granted to the consumer.
    pub mode: AttachMode,
}

/// Key used by the store to uniquely identify an AttachmentSpec structure.
pub struct AttachmentSpecKey(AttachmentId);

impl From<&AttachmentId> for AttachmentSpecKey {
    fn from(id: &AttachmentId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for AttachmentSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::AttachmentSpec
    }

    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for AttachmentSpec {
    type Key = AttachmentSpecKey;

    fn key(&self) -> Self::Key {
        AttachmentSpecKey(self.id.clone())
    }
}
