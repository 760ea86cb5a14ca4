use super::{resource_map::ResourceMap, OperationGuardArc, ResourceMutex, UpdateInnerValue};
use crate::{controller::registry::Registry, SvcError};

use memstor::{key_prefix_obj, ObjectKey, StorableObject, StorableObjectType, Store, StoreKv};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use std::{fmt::Debug, ops::Deref, sync::Arc};
use vol_port::{
    store::{
        attachment::AttachmentSpec, snapshot::SnapshotSpec, volume::VolumeSpec,
        volume_type::VolumeTypeSpec, AsOperationSequencer, SpecTransaction,
    },
    transport::{AttachmentId, ResourceKind, SnapshotId, VolumeId, VolumeTypeId},
};

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
enum SpecError {
    /// Failed to get entries from the persistent store.
    #[snafu(display("Failed to get entries from store. Error {}", source))]
    StoreGet { source: Box<memstor::Error> },
    /// Failed to deserialise object type.
    #[snafu(display("Failed to deserialise object type {}", obj_type))]
    Deserialise {
        obj_type: StorableObjectType,
        source: serde_json::Error,
    },
}

/// What to do when creation fails.
pub enum OnCreateFail {
    /// Keep the record around in the error state so the owner can inspect it
    /// and delete it explicitly.
    SetError,
    /// Delete the record, it must not outlive the operation.
    Delete,
}

/// This trait is used to encapsulate common behaviour for all different types
/// of resources, including validation rules and error handling.
#[async_trait::async_trait]
pub trait GuardedOperationsHelper:
    Debug + Sync + Send + Sized + Deref<Target = ResourceMutex<Self::Inner>> + UpdateInnerValue
{
    type Create: Debug + Sync + Send;
    type UpdateOp: Sync + Send;
    type Inner: SpecOperationsHelper<Create = Self::Create, UpdateOp = Self::UpdateOp>
        + SpecTransaction<Self::UpdateOp>
        + StorableObject
        + PartialEq<Self::Create>;

    /// Start a create operation and attempt to log the transaction to the
    /// store. In case of error, the log is undone and an error is returned.
    async fn start_create(
        &self,
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<Self::Inner, SvcError> {
        let spec_clone = {
            let mut spec = self.lock();
            match spec.start_create_inner(request) {
                Err(SvcError::InvalidUuid { uuid, kind }) => {
                    drop(spec);
                    self.remove_spec(registry);
                    return Err(SvcError::InvalidUuid { uuid, kind });
                }
                Err(error) => Err(error),
                Ok(_) => Ok(()),
            }?;
            spec.clone()
        };
        match self.store_operation_log(registry, &spec_clone).await {
            Ok(_) => Ok(spec_clone),
            Err(error) => {
                self.delete_spec(registry).await.ok();
                Err(error)
            }
        }
    }

    /// Completes a create operation by trying to update the spec in the
    /// persistent store. On failure the record is handled as per the
    /// `OnCreateFail` policy.
    async fn complete_create<R: Send>(
        &self,
        result: Result<R, SvcError>,
        registry: &Registry,
        on_fail: OnCreateFail,
    ) -> Result<R, SvcError> {
        match result {
            Ok(val) => {
                let mut spec_clone = self.lock().clone();
                spec_clone.commit_op();
                let stored = registry.store_obj(&spec_clone).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        spec.commit_op();
                        Ok(val)
                    }
                    Err(error) => {
                        spec.set_op_result(true);
                        Err(error)
                    }
                }
            }
            Err(error) => Err(self.handle_create_failed(registry, error, on_fail).await),
        }
    }

    /// Validates the outcome of a create step.
    /// In case of an error, it is handled as per the `OnCreateFail` policy.
    async fn validate_create_step<R: Send>(
        &self,
        registry: &Registry,
        result: Result<R, SvcError>,
        on_fail: OnCreateFail,
    ) -> Result<R, SvcError> {
        match result {
            Ok(val) => Ok(val),
            Err(error) => Err(self.handle_create_failed(registry, error, on_fail).await),
        }
    }

    /// Handles a failed creation according to the `OnCreateFail` policy.
    async fn handle_create_failed(
        &self,
        registry: &Registry,
        error: SvcError,
        on_fail: OnCreateFail,
    ) -> SvcError {
        match on_fail {
            OnCreateFail::SetError => {
                let spec = {
                    let mut spec = self.lock();
                    spec.fail_creating();
                    spec.clone()
                };
                registry.store_obj(&spec).await.ok();
                error
            }
            OnCreateFail::Delete => {
                self.delete_spec(registry).await.ok();
                error
            }
        }
    }

    /// Attempt to delete the spec from the persistent store and the registry.
    /// If the persistent store is unavailable the spec is marked as dirty and
    /// the record is kept so a restart can resolve it.
    async fn delete_spec(&self, registry: &Registry) -> Result<(), SvcError> {
        let spec_clone = self.lock().clone();

        match registry.delete_kv(&spec_clone.key().key()).await {
            Ok(_) => {
                self.remove_spec(registry);
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    "Failed to delete spec {:?} from the persistent store. Error {:?}",
                    spec_clone,
                    error
                );
                self.lock().set_op_result(false);
                Err(error)
            }
        }
    }

    /// Start a destroy operation and attempt to log the transaction to the
    /// store. In case of error, the log is undone and an error is returned.
    async fn start_destroy(&self, registry: &Registry) -> Result<(), SvcError> {
        {
            let spec = self.lock();
            spec.busy()?;
        }

        // resource specific validation rules
        self.validate_destroy(registry)?;

        let spec_clone = {
            let mut spec = self.lock();
            spec.start_destroy_op();
            spec.clone()
        };

        self.store_operation_log(registry, &spec_clone).await?;
        Ok(())
    }

    /// Completes a destroy operation by trying to delete the spec from the
    /// persistent store.
    async fn complete_destroy<R: Send>(
        &mut self,
        result: Result<R, SvcError>,
        registry: &Registry,
    ) -> Result<R, SvcError> {
        let key = self.lock().key();
        match result {
            Ok(val) => {
                let mut spec_clone = self.lock().clone();
                spec_clone.commit_op();
                let deleted = registry.delete_kv(&key.key()).await;
                match deleted {
                    Ok(_) => {
                        self.remove_spec(registry);
                        self.complete_op();
                        Ok(val)
                    }
                    Err(error) => {
                        self.lock().set_op_result(true);
                        self.update();
                        Err(error)
                    }
                }
            }
            Err(error) => {
                let mut spec_clone = self.lock().clone();
                spec_clone.clear_op();
                let stored = registry.store_obj(&spec_clone).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        spec.clear_op();
                        Err(error)
                    }
                    Err(error) => {
                        spec.set_op_result(false);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Start an update operation and attempt to log the transaction to the
    /// store. In case of error, the log is undone and an error is returned.
    async fn start_update(
        &self,
        registry: &Registry,
        update_operation: Self::UpdateOp,
    ) -> Result<Self::Inner, SvcError> {
        let spec_clone = {
            let mut spec = self.lock().clone();
            spec.start_update_inner(update_operation)?;
            *self.lock() = spec.clone();
            spec
        };

        self.store_operation_log(registry, &spec_clone).await?;
        Ok(spec_clone)
    }

    /// Completes an update operation by trying to update the spec in the
    /// persistent store. On success the current locked spec is committed, so
    /// mid-operation field updates (eg a driver model update) land with the
    /// commit; on failure the spec logged at `start_update` is restored with
    /// the operation's failure transitions applied.
    async fn complete_update<R: Send>(
        &mut self,
        registry: &Registry,
        result: Result<R, SvcError>,
        spec_clone: Self::Inner,
    ) -> Result<R, SvcError> {
        match result {
            Ok(val) => {
                let mut committed = self.lock().clone();
                committed.commit_op();
                let stored = registry.store_obj(&committed).await;
                match stored {
                    Ok(_) => {
                        self.complete_op();
                        Ok(val)
                    }
                    Err(error) => {
                        self.lock().set_op_result(true);
                        Err(error)
                    }
                }
            }
            Err(error) => {
                let mut reverted = spec_clone;
                reverted.clear_op();
                let stored = registry.store_obj(&reverted).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        let sequencer = spec.as_ref().clone();
                        *spec = reverted;
                        *spec.as_mut() = sequencer;
                        drop(spec);
                        self.update();
                        Err(error)
                    }
                    Err(error) => {
                        spec.set_op_result(false);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Validates the outcome of an intermediate step, part of a transaction
    /// operation. In case of an error, the spec logged at `start_update` is
    /// restored with the operation's failure transitions applied.
    async fn validate_update_step<R: Send>(
        &self,
        registry: &Registry,
        result: Result<R, SvcError>,
        spec_clone: &Self::Inner,
    ) -> Result<R, SvcError> {
        match result {
            Ok(val) => Ok(val),
            Err(error) => {
                let mut reverted = spec_clone.clone();
                reverted.clear_op();
                let stored = registry.store_obj(&reverted).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        let sequencer = spec.as_ref().clone();
                        *spec = reverted;
                        *spec.as_mut() = sequencer;
                        Err(error)
                    }
                    Err(error) => {
                        spec.set_op_result(false);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Operations that have started but were not able to complete because
    /// access to the persistent store was lost, or because the process was
    /// restarted mid-operation.
    /// Returns whether the incomplete operation has now been handled.
    async fn handle_incomplete_ops(&mut self, registry: &Registry) -> bool {
        let (creating, deleting) = {
            let spec = self.lock();
            (spec.creating(), spec.deleting())
        };
        if creating {
            // The backend resource may or may not exist; keep the record in
            // the error state for the owner to inspect and delete.
            let spec = {
                let mut spec = self.lock();
                spec.fail_creating();
                spec.clone()
            };
            return registry.store_obj(&spec).await.is_ok();
        }
        if deleting {
            return self.delete_spec(registry).await.is_ok();
        }
        self.handle_incomplete_updates(registry).await
    }

    /// Updates that have started but were not able to complete because access
    /// to the persistent store was lost.
    async fn handle_incomplete_updates(&mut self, registry: &Registry) -> bool {
        let mut spec_clone = self.lock().clone();
        match spec_clone.operation_result() {
            Some(Some(true)) => {
                spec_clone.commit_op();
                let result = registry.store_obj(&spec_clone).await;
                if result.is_ok() {
                    self.complete_op();
                }
                result.is_ok()
            }
            Some(Some(false)) | Some(None) => {
                // we must have crashed or lost the store... assume failure
                spec_clone.clear_op();
                let result = registry.store_obj(&spec_clone).await;
                if result.is_ok() {
                    let mut spec = self.lock();
                    let sequencer = spec.as_ref().clone();
                    *spec = spec_clone;
                    *spec.as_mut() = sequencer;
                    drop(spec);
                    self.update();
                }
                result.is_ok()
            }
            None => true,
        }
    }

    /// Attempt to store a spec object with a logged SpecOperation to the
    /// persistent store. In case of failure the operation cannot proceed so
    /// clear it and return an error.
    async fn store_operation_log(
        &self,
        registry: &Registry,
        spec_clone: &Self::Inner,
    ) -> Result<(), SvcError> {
        if let Err(error) = registry.store_obj(spec_clone).await {
            let mut spec = self.lock();
            spec.clear_op();
            Err(error)
        } else {
            Ok(())
        }
    }

    /// Used for resource specific validation rules.
    fn validate_destroy(&self, _registry: &Registry) -> Result<(), SvcError> {
        Ok(())
    }

    /// Remove the object from the global Spec List.
    fn remove_spec(&self, registry: &Registry);

    /// Commit the pending operation on the locked spec and refresh the
    /// guard's peek value.
    fn complete_op(&mut self) {
        self.lock().commit_op();
        self.update();
    }
}

/// Helper trait implemented by each spec, encapsulating the state checks and
/// the operation entry points used by `GuardedOperationsHelper`.
pub trait SpecOperationsHelper:
    Clone + Debug + AsOperationSequencer + Sync + Send + Sized
{
    type Create: Debug + Sync + Send;
    type UpdateOp: Sync + Send;

    /// When a create request is issued we need to validate by verifying that:
    /// 1. a previous create operation is no longer in progress
    /// 2. if it's a retry then it must have the same parameters as the
    ///    original request
    fn start_create_inner(&mut self, request: &Self::Create) -> Result<(), SvcError>
    where
        Self: PartialEq<Self::Create>,
        Self: SpecTransaction<Self::UpdateOp>,
    {
        // we're busy with another request, try again later
        self.busy()?;
        if self.uuid_str() == uuid::Uuid::default().to_string() {
            return Err(SvcError::InvalidUuid {
                uuid: self.uuid_str(),
                kind: self.kind(),
            });
        }
        if self.creating() {
            if self != request {
                Err(SvcError::ReCreateMismatch {
                    id: self.uuid_str(),
                    kind: self.kind(),
                    resource: format!("{:?}", self),
                    request: format!("{:?}", request),
                })
            } else {
                self.start_create_op();
                Ok(())
            }
        } else if self.deleting() {
            Err(SvcError::Deleting {})
        } else {
            Err(SvcError::AlreadyExists {
                kind: self.kind(),
                id: self.uuid_str(),
            })
        }
    }

    /// Checks that the object is ready to accept a new update operation.
    fn start_update_inner(&mut self, operation: Self::UpdateOp) -> Result<(), SvcError>
    where
        Self: SpecTransaction<Self::UpdateOp>,
    {
        // we're busy right now, try again later
        self.busy()?;

        if self.creating() {
            return Err(SvcError::PendingCreation {
                id: self.uuid_str(),
                kind: self.kind(),
            });
        }
        if self.deleting() {
            return Err(SvcError::PendingDeletion {
                id: self.uuid_str(),
                kind: self.kind(),
            });
        }
        // start the requested operation (which also checks if it's a valid
        // transition)
        self.start_update_op(operation)
    }

    /// Check if the object is free to be modified or if it's still busy.
    fn busy(&self) -> Result<(), SvcError>
    where
        Self: SpecTransaction<Self::UpdateOp>,
    {
        if self.dirty() {
            return Err(SvcError::StoreDirty {
                kind: self.kind(),
                id: self.uuid_str(),
            });
        }
        Ok(())
    }

    /// Check if the object has an operation log which was not flushed to the
    /// persistent store.
    fn dirty(&self) -> bool
    where
        Self: SpecTransaction<Self::UpdateOp>,
    {
        self.pending_op()
    }

    /// Get the kind (for log messages).
    fn kind(&self) -> ResourceKind;
    /// Get the UUID as a string (for log messages).
    fn uuid_str(&self) -> String;
    /// Check if the object is still being created.
    fn creating(&self) -> bool;
    /// Check if the object is being deleted.
    fn deleting(&self) -> bool;
    /// Start a create transaction.
    fn start_create_op(&mut self);
    /// Start a destroy transaction.
    fn start_destroy_op(&mut self);
    /// Mark a failed creation, clearing the operation log.
    fn fail_creating(&mut self);
    /// Return the result of the pending operation, if any.
    fn operation_result(&self) -> Option<Option<bool>>;
    /// Start an update operation, validating the state transition.
    fn start_update_op(&mut self, operation: Self::UpdateOp) -> Result<(), SvcError>;
}

/// Operations are locked behind the resource's operation sequence.
#[async_trait::async_trait]
pub trait OperationSequenceGuard<T: AsOperationSequencer + SpecOperationsHelper> {
    /// Attempt to obtain an exclusive guard for the resource.
    fn operation_guard(&self) -> Result<OperationGuardArc<T>, SvcError>;
    /// Attempt to obtain an exclusive guard for the resource.
    /// A few attempts are made with an async sleep in case something else is
    /// already running.
    async fn operation_guard_wait(&self) -> Result<OperationGuardArc<T>, SvcError>;
}

#[async_trait::async_trait]
impl<T: AsOperationSequencer + SpecOperationsHelper> OperationSequenceGuard<T>
    for ResourceMutex<T>
{
    fn operation_guard(&self) -> Result<OperationGuardArc<T>, SvcError> {
        let get_value = |s: &Self| s.lock().clone();

        match OperationGuardArc::try_sequence(self, get_value) {
            Ok(guard) => Ok(guard),
            Err(error) => {
                tracing::debug!("Resource '{}' is busy: {}", self.lock().uuid_str(), error);
                Err(SvcError::Conflict {})
            }
        }
    }
    async fn operation_guard_wait(&self) -> Result<OperationGuardArc<T>, SvcError> {
        let mut tries = 5;
        loop {
            tries -= 1;
            match self.operation_guard() {
                Ok(guard) => return Ok(guard),
                Err(error) if tries == 0 => {
                    return Err(error);
                }
                Err(_) => {}
            };

            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}

/// Locked Resource Specs.
#[derive(Default, Clone, Debug)]
pub struct ResourceSpecsLocked(Arc<RwLock<ResourceSpecs>>);

impl Deref for ResourceSpecsLocked {
    type Target = Arc<RwLock<ResourceSpecs>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Resource Specs.
#[derive(Default, Debug)]
pub struct ResourceSpecs {
    pub volumes: ResourceMap<VolumeId, VolumeSpec>,
    pub attachments: ResourceMap<AttachmentId, AttachmentSpec>,
    pub snapshots: ResourceMap<SnapshotId, SnapshotSpec>,
    pub volume_types: ResourceMap<VolumeTypeId, VolumeTypeSpec>,
}

impl ResourceSpecsLocked {
    /// Return a new empty `Self`.
    pub fn new() -> Self {
        ResourceSpecsLocked::default()
    }

    /// Initialise the resource specs with the content from the persistent
    /// store.
    pub async fn init<S: Store>(&self, store: &mut S) {
        let spec_types = [
            StorableObjectType::VolumeSpec,
            StorableObjectType::AttachmentSpec,
            StorableObjectType::SnapshotSpec,
            StorableObjectType::VolumeTypeSpec,
        ];
        for spec in &spec_types {
            if let Err(error) = self.populate_specs(store, *spec).await {
                panic!("Failed to initialise resource specs. Err {}.", error);
            }
        }
    }

    /// Deserialise a vector of serde_json values into specific spec types.
    /// If deserialisation fails for any object, return an error.
    fn deserialise_specs<T>(values: Vec<serde_json::Value>) -> Result<Vec<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        values
            .iter()
            .map(|value| serde_json::from_value(value.clone()))
            .collect()
    }

    /// Populate the resource specs with data from the persistent store.
    async fn populate_specs<S: Store>(
        &self,
        store: &mut S,
        spec_type: StorableObjectType,
    ) -> Result<(), SpecError> {
        let prefix = key_prefix_obj(spec_type, 0);
        let store_entries = store
            .get_values_prefix(&prefix)
            .await
            .map_err(|e| SpecError::StoreGet {
                source: Box::new(e),
            })?;
        let store_values = store_entries.iter().map(|e| e.1.clone()).collect();

        let mut resource_specs = self.0.write();
        match spec_type {
            StorableObjectType::VolumeSpec => {
                let mut specs = Self::deserialise_specs::<VolumeSpec>(store_values)
                    .context(Deserialise {
                        obj_type: StorableObjectType::VolumeSpec,
                    })?;
                // the sequencer is not serialized, re-key it
                for spec in &mut specs {
                    spec.sequencer = vol_port::store::OperationSequence::new(spec.uuid.clone());
                }
                resource_specs.volumes.populate(specs);
            }
            StorableObjectType::AttachmentSpec => {
                let specs = Self::deserialise_specs::<AttachmentSpec>(store_values).context(
                    Deserialise {
                        obj_type: StorableObjectType::AttachmentSpec,
                    },
                )?;
                resource_specs.attachments.populate(specs);
            }
            StorableObjectType::SnapshotSpec => {
                let specs =
                    Self::deserialise_specs::<SnapshotSpec>(store_values).context(Deserialise {
                        obj_type: StorableObjectType::SnapshotSpec,
                    })?;
                resource_specs.snapshots.populate(specs);
            }
            StorableObjectType::VolumeTypeSpec => {
                let specs = Self::deserialise_specs::<VolumeTypeSpec>(store_values).context(
                    Deserialise {
                        obj_type: StorableObjectType::VolumeTypeSpec,
                    },
                )?;
                resource_specs.volume_types.populate(specs);
            }
            _ => {
                // Not all spec types are persisted in the store.
                unimplemented!("{} not persisted in store", spec_type);
            }
        };
        Ok(())
    }
}
