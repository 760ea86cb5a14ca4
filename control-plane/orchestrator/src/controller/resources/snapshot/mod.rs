use super::ResourceUid;
use vol_port::{store::snapshot::SnapshotSpec, transport::SnapshotId};

impl ResourceUid for SnapshotSpec {
    type Uid = SnapshotId;
    fn uid(&self) -> &Self::Uid {
        &self.uuid
    }
}
