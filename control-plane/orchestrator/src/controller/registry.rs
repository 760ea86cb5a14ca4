//! Registry containing all the control plane resources: the authoritative
//! in-memory specs, the persistent store they are written through to, the
//! registered backend drivers and the external collaborators (quotas and
//! the event notifier).
//!
//! On startup the specs are repopulated from the persistent store and any
//! operation log left behind by a crash is resolved; volumes stuck
//! mid-migration are left for operator intervention.

use super::resources::operations_helper::{
    GuardedOperationsHelper, OperationSequenceGuard, ResourceSpecsLocked,
};
use crate::{
    backend::{BackendDriver, ConnectorProperties},
    copy::Throttle,
    notify::{Notification, Notifier},
    quota::Quotas,
    SvcError,
};
use memstor::{MemStore, StorableObject, StoreKey, StoreKv, StoreObj};
use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use vol_port::{transport::BackendName, ErrorChain};

/// Options applied to every generic data copy.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Requested human block size, eg `"1M"`.
    pub block_size: String,
    /// ionice class arguments for the copy utility.
    pub ionice: Option<String>,
    /// Optional throttling wrapper.
    pub throttle: Option<Throttle>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            block_size: "1M".to_string(),
            ionice: None,
            throttle: None,
        }
    }
}

/// Explicit configuration of the core agent, threaded into the registry and
/// the backend constructors at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Store operation timeout.
    pub store_timeout: Duration,
    /// Fixed interval between polls when waiting for a volume to settle.
    pub create_poll_period: Duration,
    /// Bound on the number of polls when waiting for a volume to settle.
    pub create_poll_tries: u32,
    /// Options applied to every generic data copy.
    pub copy: CopyOptions,
    /// Connector properties of the host this agent runs on, used when
    /// attaching volumes for a generic copy of an unattached volume.
    pub connector: ConnectorProperties,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(30),
            create_poll_period: Duration::from_millis(500),
            create_poll_tries: 60,
            copy: CopyOptions::default(),
            connector: ConnectorProperties::for_host("core-agent"),
        }
    }
}

/// Registry containing all the resources and collaborator handles.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner<MemStore>>,
}

impl Deref for Registry {
    type Target = Arc<RegistryInner<MemStore>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Generic Registry Inner with a Store trait.
pub struct RegistryInner<S: StoreKv> {
    /// spec (aka desired state) of the various resources.
    specs: ResourceSpecsLocked,
    /// persistent store which the specs are written through to.
    store: Arc<Mutex<S>>,
    /// store operation timeout.
    store_timeout: Duration,
    /// registered backend drivers, keyed by backend name.
    backends: parking_lot::RwLock<HashMap<BackendName, Arc<dyn BackendDriver>>>,
    /// the quota subsystem.
    quotas: Arc<dyn Quotas>,
    /// the lifecycle event notifier.
    notifier: Arc<dyn Notifier>,
    /// agent configuration.
    config: CoreConfig,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish()
    }
}

impl Registry {
    /// Create a new registry with the given configuration, store and
    /// collaborators.
    pub fn new(
        config: CoreConfig,
        store: MemStore,
        quotas: Arc<dyn Quotas>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                specs: ResourceSpecsLocked::new(),
                store: Arc::new(Mutex::new(store)),
                store_timeout: config.store_timeout,
                backends: parking_lot::RwLock::new(HashMap::new()),
                quotas,
                notifier,
                config,
            }),
        }
    }

    /// Start the registry: repopulate the specs from the persistent store and
    /// resolve any operation log left behind by a restart.
    pub async fn start(&self) {
        {
            let mut store = self.store.lock().await;
            self.specs.init(&mut *store).await;
        }
        self.resolve_incomplete_ops().await;
    }

    /// The resource specs.
    pub fn specs(&self) -> &ResourceSpecsLocked {
        &self.specs
    }

    /// The agent configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The connector properties of this agent's host.
    pub fn connector(&self) -> &ConnectorProperties {
        &self.config.connector
    }

    /// The quota subsystem.
    pub fn quotas(&self) -> &Arc<dyn Quotas> {
        &self.quotas
    }

    /// Register a backend driver.
    pub fn register_backend(&self, driver: Arc<dyn BackendDriver>) {
        self.backends
            .write()
            .insert(driver.name().clone(), driver);
    }

    /// Get the driver serving the given backend.
    pub fn backend(&self, name: &BackendName) -> Result<Arc<dyn BackendDriver>, SvcError> {
        self.backends
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SvcError::BackendNotFound {
                backend: name.to_string(),
            })
    }

    /// Serialize the object and write it to the persistent store.
    pub async fn store_obj<O: StorableObject>(&self, object: &O) -> Result<(), SvcError> {
        let mut store = self.store.lock().await;
        match tokio::time::timeout(self.store_timeout, async move {
            store.put_obj(object).await
        })
        .await
        {
            Ok(result) => result.map_err(SvcError::from),
            Err(_) => Err(SvcError::Store {
                source: memstor::Error::Timeout {
                    operation: "Put".to_string(),
                    timeout: self.store_timeout,
                },
            }),
        }
    }

    /// Delete the key from the persistent store.
    pub async fn delete_kv<K: StoreKey>(&self, key: &K) -> Result<(), SvcError> {
        let mut store = self.store.lock().await;
        match tokio::time::timeout(
            self.store_timeout,
            async move { store.delete_kv(key).await },
        )
        .await
        {
            Ok(result) => result.map_err(SvcError::from),
            Err(_) => Err(SvcError::Store {
                source: memstor::Error::Timeout {
                    operation: "Delete".to_string(),
                    timeout: self.store_timeout,
                },
            }),
        }
    }

    /// Publish a lifecycle event. Notification failures are logged, never
    /// propagated: they must not fail or roll back the operation they report.
    pub async fn notify(&self, notification: Notification) {
        if let Err(error) = self.notifier.publish(&notification).await {
            tracing::warn!(
                event = notification.event(),
                error = error.full_string(),
                "Failed to publish notification"
            );
        }
    }

    /// Resolve operation logs left behind by a crash and flag volumes stuck
    /// mid-migration, which require operator intervention.
    async fn resolve_incomplete_ops(&self) {
        let volumes = self.specs.read().volumes.to_vec();
        for volume in volumes {
            if let Ok(mut guard) = volume.operation_guard() {
                guard.handle_incomplete_ops(self).await;
            }
            let spec = volume.lock().clone();
            if spec.migration.in_flight() {
                tracing::warn!(
                    volume.uuid = %spec.uuid,
                    migration = %spec.migration,
                    "Volume is stuck mid-migration; operator intervention required"
                );
            }
        }
    }
}
