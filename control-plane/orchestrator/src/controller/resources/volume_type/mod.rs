use super::ResourceUid;
use vol_port::{store::volume_type::VolumeTypeSpec, transport::VolumeTypeId};

impl ResourceUid for VolumeTypeSpec {
    type Uid = VolumeTypeId;
    fn uid(&self) -> &Self::Uid {
        &self.id
    }
}
