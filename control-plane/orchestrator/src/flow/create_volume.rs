//! The create-volume pipeline: reserve quota, allocate the backend volume,
//! commit the quota. The caller owns the record transaction envelope around
//! the flow.

use super::{Flow, FlowStore, FlowTask};
use crate::{
    backend::ModelUpdate,
    controller::registry::Registry,
    quota::{QuotaDeltas, ReservationToken},
    SvcError,
};
use vol_port::{store::volume::VolumeSpec, transport::VolumeContentSource, ErrorChain};

/// Store keys shared by the volume pipelines.
pub mod keys {
    /// The volume record being worked on (`VolumeSpec`).
    pub const VOLUME: &str = "volume";
    /// The quota hold (`ReservationToken`).
    pub const RESERVATION: &str = "reservation";
    /// The driver's model update (`ModelUpdate`).
    pub const MODEL: &str = "model";
    /// Backend-specific reference to a pre-existing volume (`String`).
    pub const EXISTING_REF: &str = "existing_ref";
}

/// The create-volume flow over a store seeded with `keys::VOLUME`.
pub fn create_volume_flow() -> Flow {
    Flow::new("create-volume")
        .with_task(ReserveQuota {})
        .with_task(CreateOnBackend {})
        .with_task(CommitQuota {})
}

/// Reserve the volume's quota deltas; rolled back if a later task fails.
pub struct ReserveQuota {}

#[async_trait::async_trait]
impl FlowTask for ReserveQuota {
    fn name(&self) -> &'static str {
        "reserve-quota"
    }
    fn requires(&self) -> &[&'static str] {
        &[keys::VOLUME]
    }
    fn provides(&self) -> &[&'static str] {
        &[keys::RESERVATION]
    }
    async fn execute(&self, registry: &Registry, store: &mut FlowStore) -> Result<(), SvcError> {
        let volume: &VolumeSpec = store.get(keys::VOLUME)?;
        let deltas =
            QuotaDeltas::default().with_volume(volume.size, volume.volume_type.as_ref());
        let token = registry.quotas().reserve(&volume.project, deltas).await?;
        store.put(keys::RESERVATION, token);
        Ok(())
    }
    async fn revert(
        &self,
        registry: &Registry,
        store: &mut FlowStore,
        _error: &SvcError,
    ) -> Result<(), SvcError> {
        let token: ReservationToken = store.take(keys::RESERVATION)?;
        registry.quotas().rollback(token).await
    }
}

/// Ask the serving backend to allocate the volume, resolving the content
/// source. A volume descending from a snapshot or clone chain is built from
/// that source here; a migration destination never is (its spec carries no
/// source).
pub struct CreateOnBackend {}

#[async_trait::async_trait]
impl FlowTask for CreateOnBackend {
    fn name(&self) -> &'static str {
        "create-on-backend"
    }
    fn requires(&self) -> &[&'static str] {
        &[keys::VOLUME]
    }
    fn provides(&self) -> &[&'static str] {
        &[keys::MODEL]
    }
    async fn execute(&self, registry: &Registry, store: &mut FlowStore) -> Result<(), SvcError> {
        let volume: &VolumeSpec = store.get(keys::VOLUME)?;
        let driver = registry.backend(volume.host.backend())?;
        if !driver.ready() {
            return Err(SvcError::DriverNotInitialized {
                backend: volume.host.backend().to_string(),
            });
        }
        let model = match &volume.source {
            VolumeContentSource::None => driver.create_volume(volume).await?,
            VolumeContentSource::Snapshot(snapshot) => {
                let snapshot = registry.specs().snapshot(snapshot)?;
                driver.create_volume_from_snapshot(volume, &snapshot).await?
            }
            VolumeContentSource::Clone(source) => {
                let source = registry.specs().volume_clone(source)?;
                driver.create_cloned_volume(volume, &source).await?
            }
        };
        store.put(keys::MODEL, model);
        Ok(())
    }
    async fn revert(
        &self,
        registry: &Registry,
        store: &mut FlowStore,
        _error: &SvcError,
    ) -> Result<(), SvcError> {
        let volume: &VolumeSpec = store.get(keys::VOLUME)?;
        let driver = registry.backend(volume.host.backend())?;
        driver.delete_volume(volume).await
    }
}

/// Fold the quota hold into the project's usage.
pub struct CommitQuota {}

#[async_trait::async_trait]
impl FlowTask for CommitQuota {
    fn name(&self) -> &'static str {
        "commit-quota"
    }
    fn requires(&self) -> &[&'static str] {
        &[keys::RESERVATION, keys::MODEL]
    }
    async fn execute(&self, registry: &Registry, store: &mut FlowStore) -> Result<(), SvcError> {
        let token: ReservationToken = store.take(keys::RESERVATION)?;
        if let Err(error) = registry.quotas().commit(token).await {
            // the backend volume exists and the record will go available, so
            // a commit failure must not fail the create: flag it instead
            tracing::error!(
                error = error.full_string(),
                "Failed to commit quota reservation"
            );
        }
        Ok(())
    }
}

/// Apply the driver's model update, left in the store by the backend task,
/// to the record.
pub fn apply_model(store: &mut FlowStore, spec: &mut VolumeSpec) {
    if let Ok(model) = store.take::<ModelUpdate>(keys::MODEL) {
        model.apply(spec);
    }
}
