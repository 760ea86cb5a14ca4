use crate::{controller::registry::Registry, SvcError};

/// Resource Lifecycle Operations.
#[async_trait::async_trait]
pub trait ResourceLifecycle {
    type Create: Sync + Send;
    type CreateOutput: Sync + Send + Sized;
    type Destroy: Sync + Send;
    /// Create the `Self` Resource itself.
    async fn create(
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<Self::CreateOutput, SvcError>;
    /// Destroy the resource itself.
    async fn destroy(
        &mut self,
        registry: &Registry,
        request: &Self::Destroy,
    ) -> Result<(), SvcError>;
}

/// Resource Attach Operations.
#[async_trait::async_trait]
pub trait ResourceAttach {
    type Attach: Sync + Send;
    type AttachOutput: Sync + Send + Sized;
    type Detach: Sync + Send;

    /// Attach the resource to a consumer.
    async fn attach(
        &mut self,
        registry: &Registry,
        request: &Self::Attach,
    ) -> Result<Self::AttachOutput, SvcError>;
    /// Detach the resource from a consumer.
    async fn detach(
        &mut self,
        registry: &Registry,
        request: &Self::Detach,
    ) -> Result<(), SvcError>;
}

/// Resource Resize Operations.
#[async_trait::async_trait]
pub trait ResourceResize {
    type Resize: Sync + Send;

    /// Grow the resource.
    async fn resize(
        &mut self,
        registry: &Registry,
        request: &Self::Resize,
    ) -> Result<(), SvcError>;
}

/// Resource Migration Operations.
#[async_trait::async_trait]
pub trait ResourceMigration {
    type Migrate: Sync + Send;

    /// Move the resource's data to another backend placement.
    async fn migrate(
        &mut self,
        registry: &Registry,
        request: &Self::Migrate,
    ) -> Result<(), SvcError>;
}

/// Resource Retype Operations.
#[async_trait::async_trait]
pub trait ResourceRetype {
    type Retype: Sync + Send;

    /// Change the resource's type, possibly moving its data.
    async fn retype(
        &mut self,
        registry: &Registry,
        request: &Self::Retype,
    ) -> Result<(), SvcError>;
}

/// Resource Snapshot Operations.
#[async_trait::async_trait]
pub trait ResourceSnapshotting {
    type CreateSnap: Sync + Send;
    type CreateSnapOutput: Sync + Send + Sized;
    type DestroySnap: Sync + Send;

    /// Create a snapshot of the `Self` resource.
    async fn create_snap(
        &mut self,
        registry: &Registry,
        request: &Self::CreateSnap,
    ) -> Result<Self::CreateSnapOutput, SvcError>;
    /// Destroy the snapshot of the `Self` resource.
    async fn destroy_snap(
        &mut self,
        registry: &Registry,
        request: &Self::DestroySnap,
    ) -> Result<(), SvcError>;
}

/// Bringing pre-existing backend resources under management.
#[async_trait::async_trait]
pub trait ResourceManagement {
    type Manage: Sync + Send;
    type ManageOutput: Sync + Send + Sized;

    /// Manage an existing backend resource as a `Self` Resource.
    async fn manage(
        registry: &Registry,
        request: &Self::Manage,
    ) -> Result<Self::ManageOutput, SvcError>;
}
