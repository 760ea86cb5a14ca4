//! The manage-existing-volume pipeline: reserve quota, adopt the backend
//! volume, commit the quota.
//!
//! Adoption is never reverted by deleting the backend volume: the data
//! pre-exists and keeps belonging to its owner even when the pipeline fails.

use super::{
    create_volume::{keys, CommitQuota, ReserveQuota},
    Flow, FlowStore, FlowTask,
};
use crate::{controller::registry::Registry, SvcError};
use vol_port::store::volume::VolumeSpec;

/// The manage-existing flow over a store seeded with `keys::VOLUME` and
/// `keys::EXISTING_REF`.
pub fn manage_volume_flow() -> Flow {
    Flow::new("manage-volume")
        .with_task(ReserveQuota {})
        .with_task(ManageOnBackend {})
        .with_task(CommitQuota {})
}

/// Ask the serving backend to bring the referenced volume under management.
pub struct ManageOnBackend {}

#[async_trait::async_trait]
impl FlowTask for ManageOnBackend {
    fn name(&self) -> &'static str {
        "manage-on-backend"
    }
    fn requires(&self) -> &[&'static str] {
        &[keys::VOLUME, keys::EXISTING_REF]
    }
    fn provides(&self) -> &[&'static str] {
        &[keys::MODEL]
    }
    async fn execute(&self, registry: &Registry, store: &mut FlowStore) -> Result<(), SvcError> {
        let volume: &VolumeSpec = store.get(keys::VOLUME)?;
        let existing_ref: &String = store.get(keys::EXISTING_REF)?;
        let driver = registry.backend(volume.host.backend())?;
        if !driver.ready() {
            return Err(SvcError::DriverNotInitialized {
                backend: volume.host.backend().to_string(),
            });
        }
        let model = driver.manage_existing(volume, existing_ref).await?;
        store.put(keys::MODEL, model);
        Ok(())
    }
}
