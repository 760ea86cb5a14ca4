//! The in-process test harness: a cluster of two fault-injecting backends
//! over one registry, store and quota table.

use orchestrator::{
    backend::{
        AttachInfo, BackendDriver, Capabilities, ConnectorProperties, MigrateOutcome, ModelUpdate,
    },
    controller::registry::{CoreConfig, CopyOptions, Registry},
    copy::VolumeHandle,
    notify::LogNotifier,
    quota::MemQuotas,
    volume::Service,
    SvcError,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use vol_port::{
    store::{snapshot::SnapshotSpec, volume::VolumeSpec, volume_type::VolumeTypeSpec},
    transport::{BackendName, CreateVolume, HostLocator, ProjectId, VolumeId},
};

/// How a `FaultBackend` answers a native migration request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MigrateBehaviour {
    /// Decline, routing the migration through the generic copy.
    #[default]
    Decline,
    /// Move the volume natively.
    Move,
    /// Fail fatally.
    Fail,
}

/// Switches flipping the fault injection points of a `FaultBackend`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FaultState {
    /// Report the driver as not initialized.
    pub offline: bool,
    /// Fail volume creations.
    pub fail_create: bool,
    /// Never complete volume creations.
    pub hang_create: bool,
    /// Fail volume deletions.
    pub fail_delete: bool,
    /// Fail attach requests.
    pub fail_attach: bool,
    /// Fail detach requests.
    pub fail_detach: bool,
    /// Fail extend requests.
    pub fail_extend: bool,
    /// Native migration behaviour.
    pub migrate: MigrateBehaviour,
    /// Whether an in-place retype succeeds.
    pub retype_handled: bool,
    /// Whether `update_migrated_volume` is supported.
    pub update_migrated_supported: bool,
    /// Reported sparse copy capability.
    pub sparse: bool,
}

/// A backend driver whose behaviour is scripted by a `FaultState`, recording
/// every call it serves.
#[derive(Debug)]
pub struct FaultBackend {
    name: BackendName,
    state: Mutex<FaultState>,
    calls: Mutex<Vec<String>>,
}

impl FaultBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: BackendName::from(name),
            state: Mutex::new(FaultState::default()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Flip fault switches.
    pub fn configure(&self, configure: impl FnOnce(&mut FaultState)) {
        configure(&mut self.state.lock().unwrap());
    }

    /// The calls served so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any served call starts with the given prefix.
    pub fn called(&self, prefix: &str) -> bool {
        self.calls()
            .iter()
            .any(|call| call.starts_with(prefix))
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn state(&self) -> FaultState {
        *self.state.lock().unwrap()
    }

    fn located(&self, volume: &VolumeSpec) -> ModelUpdate {
        ModelUpdate {
            provider_location: Some(format!("{}/{}", self.name, volume.uuid)),
            replication_status: None,
        }
    }

    fn fail(&self, operation: &str) -> SvcError {
        SvcError::Internal {
            details: format!("{}: injected {operation} failure", self.name),
        }
    }
}

#[async_trait::async_trait]
impl BackendDriver for FaultBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    fn ready(&self) -> bool {
        !self.state().offline
    }

    async fn create_volume(&self, volume: &VolumeSpec) -> Result<ModelUpdate, SvcError> {
        self.log(format!("create:{}", volume.uuid));
        let state = self.state();
        if state.hang_create {
            tokio::time::sleep(Duration::from_secs(120)).await;
        }
        if state.fail_create {
            return Err(self.fail("create"));
        }
        Ok(self.located(volume))
    }

    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeSpec,
        snapshot: &SnapshotSpec,
    ) -> Result<ModelUpdate, SvcError> {
        self.log(format!("create-from-snapshot:{}:{}", volume.uuid, snapshot.uuid));
        if self.state().fail_create {
            return Err(self.fail("create"));
        }
        Ok(self.located(volume))
    }

    async fn create_cloned_volume(
        &self,
        volume: &VolumeSpec,
        source: &VolumeSpec,
    ) -> Result<ModelUpdate, SvcError> {
        self.log(format!("create-clone:{}:{}", volume.uuid, source.uuid));
        if self.state().fail_create {
            return Err(self.fail("create"));
        }
        Ok(self.located(volume))
    }

    async fn delete_volume(&self, volume: &VolumeSpec) -> Result<(), SvcError> {
        self.log(format!("delete:{}", volume.uuid));
        if self.state().fail_delete {
            return Err(self.fail("delete"));
        }
        Ok(())
    }

    async fn extend_volume(&self, volume: &VolumeSpec, new_size: u64) -> Result<(), SvcError> {
        self.log(format!("extend:{}:{}", volume.uuid, new_size));
        if self.state().fail_extend {
            return Err(self.fail("extend"));
        }
        Ok(())
    }

    async fn create_snapshot(
        &self,
        volume: &VolumeSpec,
        snapshot: &SnapshotSpec,
    ) -> Result<(), SvcError> {
        self.log(format!("snapshot:{}:{}", volume.uuid, snapshot.uuid));
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot: &SnapshotSpec) -> Result<(), SvcError> {
        self.log(format!("delete-snapshot:{}", snapshot.uuid));
        Ok(())
    }

    async fn manage_existing(
        &self,
        volume: &VolumeSpec,
        existing_ref: &str,
    ) -> Result<ModelUpdate, SvcError> {
        self.log(format!("manage:{}:{existing_ref}", volume.uuid));
        if self.state().fail_create {
            return Err(self.fail("manage"));
        }
        Ok(ModelUpdate {
            provider_location: Some(existing_ref.to_string()),
            replication_status: None,
        })
    }

    async fn migrate_volume(
        &self,
        volume: &VolumeSpec,
        destination: &HostLocator,
    ) -> Result<MigrateOutcome, SvcError> {
        self.log(format!("migrate:{}:{destination}", volume.uuid));
        match self.state().migrate {
            MigrateBehaviour::Decline => Ok(MigrateOutcome::Declined),
            MigrateBehaviour::Move => Ok(MigrateOutcome::Moved(ModelUpdate {
                provider_location: Some(format!("{destination}/{}", volume.uuid)),
                replication_status: None,
            })),
            MigrateBehaviour::Fail => Err(self.fail("migrate")),
        }
    }

    async fn retype(
        &self,
        volume: &VolumeSpec,
        new_type: &VolumeTypeSpec,
    ) -> Result<bool, SvcError> {
        self.log(format!("retype:{}:{}", volume.uuid, new_type.id));
        Ok(self.state().retype_handled)
    }

    async fn attach_volume(
        &self,
        volume: &VolumeSpec,
        connector: &ConnectorProperties,
    ) -> Result<AttachInfo, SvcError> {
        self.log(format!("attach:{}:{}", volume.uuid, connector.host));
        if self.state().fail_attach {
            return Err(self.fail("attach"));
        }
        Ok(AttachInfo {
            handle: VolumeHandle::Stream(Box::new(std::io::Cursor::new(vec![7u8; 4096]))),
        })
    }

    async fn detach_volume(
        &self,
        volume: &VolumeSpec,
        connector: &ConnectorProperties,
    ) -> Result<(), SvcError> {
        self.log(format!("detach:{}:{}", volume.uuid, connector.host));
        if self.state().fail_detach {
            return Err(self.fail("detach"));
        }
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Capabilities, SvcError> {
        Ok(Capabilities {
            sparse_copy_volume: self.state().sparse,
            multiattach: true,
        })
    }

    async fn update_migrated_volume(
        &self,
        volume: &VolumeSpec,
        new_volume: &VolumeSpec,
    ) -> Result<(), SvcError> {
        self.log(format!("update-migrated:{}:{}", volume.uuid, new_volume.uuid));
        if self.state().update_migrated_supported {
            Ok(())
        } else {
            Err(SvcError::NotSupported {
                operation: "update_migrated_volume".to_string(),
            })
        }
    }
}

/// A two-backend cluster over one registry.
pub struct Cluster {
    pub service: Service,
    pub alpha: Arc<FaultBackend>,
    pub beta: Arc<FaultBackend>,
    pub quotas: Arc<MemQuotas>,
    pub store: memstor::MemStore,
}

impl Cluster {
    /// A cluster with the given per-resource quota limits.
    pub fn with_limits(limits: HashMap<String, i64>) -> Self {
        let config = CoreConfig {
            store_timeout: Duration::from_secs(5),
            create_poll_period: Duration::from_millis(10),
            create_poll_tries: 50,
            copy: CopyOptions::default(),
            connector: ConnectorProperties::for_host("core-agent"),
        };
        let quotas = Arc::new(MemQuotas::new(limits));
        let store = memstor::MemStore::new();
        let registry = Registry::new(
            config,
            store.clone(),
            quotas.clone(),
            Arc::new(LogNotifier::default()),
        );
        let alpha = FaultBackend::new("alpha");
        let beta = FaultBackend::new("beta");
        registry.register_backend(alpha.clone());
        registry.register_backend(beta.clone());
        Self {
            service: Service::new(registry),
            alpha,
            beta,
            quotas,
            store,
        }
    }

    /// A cluster without quota limits.
    pub fn new() -> Self {
        Self::with_limits(HashMap::new())
    }

    /// The project every test volume belongs to.
    pub fn project() -> ProjectId {
        ProjectId::from("tenant-a")
    }

    /// A 10 GiB create request placed on the alpha backend.
    pub fn create_request(&self) -> CreateVolume {
        CreateVolume {
            uuid: VolumeId::new(),
            size: 10,
            host: "node-1@alpha#pool-a".parse().unwrap(),
            project: Self::project(),
            volume_type: None,
            source: Default::default(),
            multiattach: false,
        }
    }

    /// The beta backend's placement.
    pub fn beta_host() -> HostLocator {
        "node-2@beta#pool-b".parse().unwrap()
    }

    /// Create an available volume on the alpha backend.
    pub async fn available_volume(&self) -> VolumeSpec {
        self.service
            .create_volume(&self.create_request())
            .await
            .expect("volume creation")
    }
}
