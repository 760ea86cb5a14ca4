use super::ResourceUid;
use vol_port::{store::attachment::AttachmentSpec, transport::AttachmentId};

impl ResourceUid for AttachmentSpec {
    type Uid = AttachmentId;
    fn uid(&self) -> &Self::Uid {
        &self.id
    }
}
