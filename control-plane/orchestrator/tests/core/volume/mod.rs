//! Volume lifecycle scenarios: create, delete, attach/detach, extend,
//! manage-existing, snapshots and restart hygiene.

mod migration;
mod retype;

use crate::testlib::Cluster;
use memstor::StoreObj;
use orchestrator::{
    controller::registry::Registry,
    notify::LogNotifier,
    quota::{MemQuotas, QUOTA_GIGABYTES, QUOTA_VOLUMES},
    SvcError,
};
use std::{collections::HashMap, sync::Arc};
use vol_port::{
    store::volume::{MigrateOperation, VolumeOperation, VolumeOperationState},
    transport::{
        AttachVolume, CreateSnapshot, CreateVolume, DestroySnapshot, DestroyVolume, DetachVolume,
        ExtendVolume, ManageVolume, MigrationStatus, SnapshotId, VolumeContentSource, VolumeId,
        VolumeStatus,
    },
};

#[tokio::test]
async fn create_goes_available() {
    let cluster = Cluster::with_limits(HashMap::from([
        (QUOTA_VOLUMES.to_string(), 10),
        (QUOTA_GIGABYTES.to_string(), 100),
    ]));
    let request = cluster.create_request();
    let volume = cluster.service.create_volume(&request).await.unwrap();

    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::None);
    assert!(volume.provider_location.as_deref().unwrap().starts_with("alpha/"));
    assert_eq!(
        cluster.quotas.usage(&Cluster::project(), QUOTA_GIGABYTES).await,
        (10, 0)
    );
    assert_eq!(
        cluster.quotas.usage(&Cluster::project(), QUOTA_VOLUMES).await,
        (1, 0)
    );
}

#[tokio::test]
async fn create_failure_sets_error_and_rolls_back_quota() {
    let cluster = Cluster::with_limits(HashMap::from([(QUOTA_GIGABYTES.to_string(), 100)]));
    cluster.alpha.configure(|state| state.fail_create = true);

    let request = cluster.create_request();
    cluster
        .service
        .create_volume(&request)
        .await
        .expect_err("backend creation fails");

    let volume = cluster.service.get_volume(&request.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Error);
    assert_eq!(
        cluster.quotas.usage(&Cluster::project(), QUOTA_GIGABYTES).await,
        (0, 0)
    );
}

#[tokio::test]
async fn over_quota_create_is_refused() {
    let cluster = Cluster::with_limits(HashMap::from([(QUOTA_GIGABYTES.to_string(), 5)]));
    let request = cluster.create_request();
    let error = cluster
        .service
        .create_volume(&request)
        .await
        .expect_err("over quota");
    assert!(matches!(error, SvcError::OverQuota { .. }));
    // the backend was never asked for anything
    assert!(cluster.alpha.calls().is_empty());
}

#[tokio::test]
async fn delete_releases_the_record_and_quota() {
    let cluster = Cluster::with_limits(HashMap::from([(QUOTA_GIGABYTES.to_string(), 100)]));
    let volume = cluster.available_volume().await;

    cluster
        .service
        .destroy_volume(&DestroyVolume {
            uuid: volume.uuid.clone(),
        })
        .await
        .unwrap();

    assert!(matches!(
        cluster.service.get_volume(&volume.uuid),
        Err(SvcError::VolumeNotFound { .. })
    ));
    assert!(cluster.alpha.called(&format!("delete:{}", volume.uuid)));
    assert_eq!(
        cluster.quotas.usage(&Cluster::project(), QUOTA_GIGABYTES).await,
        (0, 0)
    );
}

#[tokio::test]
async fn attach_detach_roundtrip() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;

    let attachment = cluster
        .service
        .attach_volume(&AttachVolume {
            uuid: volume.uuid.clone(),
            instance_uuid: Some("instance-1".to_string()),
            attached_host: Some("compute-1".to_string()),
            mountpoint: "/dev/vdb".to_string(),
            mode: Default::default(),
        })
        .await
        .unwrap();

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::InUse);
    assert!(cluster.alpha.called(&format!("attach:{}", volume.uuid)));

    cluster
        .service
        .detach_volume(&DetachVolume {
            uuid: volume.uuid.clone(),
            attachment: attachment.id.clone(),
        })
        .await
        .unwrap();

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert!(cluster.alpha.called(&format!("detach:{}", volume.uuid)));
}

#[tokio::test]
async fn multiattach_keeps_the_volume_in_use() {
    let cluster = Cluster::new();
    let mut request = cluster.create_request();
    request.multiattach = true;
    let volume = cluster.service.create_volume(&request).await.unwrap();

    let attach = |instance: &str| AttachVolume {
        uuid: volume.uuid.clone(),
        instance_uuid: Some(instance.to_string()),
        attached_host: Some("compute-1".to_string()),
        mountpoint: "/dev/vdb".to_string(),
        mode: Default::default(),
    };
    let first = cluster.service.attach_volume(&attach("instance-1")).await.unwrap();
    cluster.service.attach_volume(&attach("instance-2")).await.unwrap();

    cluster
        .service
        .detach_volume(&DetachVolume {
            uuid: volume.uuid.clone(),
            attachment: first.id.clone(),
        })
        .await
        .unwrap();

    // one consumer remains
    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::InUse);
}

#[tokio::test]
async fn attached_volumes_cannot_be_deleted() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster
        .service
        .attach_volume(&AttachVolume {
            uuid: volume.uuid.clone(),
            instance_uuid: Some("instance-1".to_string()),
            attached_host: None,
            mountpoint: "/dev/vdb".to_string(),
            mode: Default::default(),
        })
        .await
        .unwrap();

    let error = cluster
        .service
        .destroy_volume(&DestroyVolume {
            uuid: volume.uuid.clone(),
        })
        .await
        .expect_err("attached volumes are busy");
    assert!(matches!(error, SvcError::InUse { .. }));
}

#[tokio::test]
async fn extend_grows_size_and_quota() {
    let cluster = Cluster::with_limits(HashMap::from([(QUOTA_GIGABYTES.to_string(), 100)]));
    let volume = cluster.available_volume().await;

    let volume = cluster
        .service
        .extend_volume(&ExtendVolume {
            uuid: volume.uuid.clone(),
            new_size: 25,
        })
        .await
        .unwrap();

    assert_eq!(volume.size, 25);
    assert_eq!(
        cluster.quotas.usage(&Cluster::project(), QUOTA_GIGABYTES).await,
        (25, 0)
    );
}

#[tokio::test]
async fn failed_extend_rolls_back_quota() {
    let cluster = Cluster::with_limits(HashMap::from([(QUOTA_GIGABYTES.to_string(), 100)]));
    let volume = cluster.available_volume().await;
    cluster.alpha.configure(|state| state.fail_extend = true);

    cluster
        .service
        .extend_volume(&ExtendVolume {
            uuid: volume.uuid.clone(),
            new_size: 25,
        })
        .await
        .expect_err("backend extend fails");

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.size, 10);
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(
        cluster.quotas.usage(&Cluster::project(), QUOTA_GIGABYTES).await,
        (10, 0)
    );
}

#[tokio::test]
async fn manage_existing_adopts_the_backend_volume() {
    let cluster = Cluster::new();
    let request = ManageVolume {
        uuid: VolumeId::new(),
        host: "node-1@alpha#pool-a".parse().unwrap(),
        existing_ref: "lun-0042".to_string(),
        size: 30,
        project: Cluster::project(),
        volume_type: None,
    };
    let volume = cluster.service.manage_volume(&request).await.unwrap();

    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.size, 30);
    assert_eq!(volume.provider_location.as_deref(), Some("lun-0042"));
}

#[tokio::test]
async fn failed_manage_leaves_no_record() {
    let cluster = Cluster::new();
    cluster.alpha.configure(|state| state.fail_create = true);
    let request = ManageVolume {
        uuid: VolumeId::new(),
        host: "node-1@alpha#pool-a".parse().unwrap(),
        existing_ref: "lun-0042".to_string(),
        size: 30,
        project: Cluster::project(),
        volume_type: None,
    };
    cluster
        .service
        .manage_volume(&request)
        .await
        .expect_err("adoption fails");

    assert!(matches!(
        cluster.service.get_volume(&request.uuid),
        Err(SvcError::VolumeNotFound { .. })
    ));
}

#[tokio::test]
async fn create_from_missing_snapshot_is_refused_up_front() {
    let cluster = Cluster::new();
    let mut request = cluster.create_request();
    request.source = VolumeContentSource::Snapshot(SnapshotId::new());

    let error = cluster
        .service
        .create_volume(&request)
        .await
        .expect_err("snapshot does not exist");
    assert!(matches!(error, SvcError::SnapshotNotFound { .. }));
    assert!(matches!(
        cluster.service.get_volume(&request.uuid),
        Err(SvcError::VolumeNotFound { .. })
    ));
}

#[tokio::test]
async fn create_from_snapshot_uses_the_snapshot() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    let snapshot = cluster
        .service
        .create_snapshot(&CreateSnapshot {
            uuid: SnapshotId::new(),
            volume: volume.uuid.clone(),
        })
        .await
        .unwrap();

    let mut request = cluster.create_request();
    request.source = VolumeContentSource::Snapshot(snapshot.uuid.clone());
    let restored = cluster.service.create_volume(&request).await.unwrap();

    assert_eq!(restored.status, VolumeStatus::Available);
    assert!(cluster
        .alpha
        .called(&format!("create-from-snapshot:{}", restored.uuid)));
}

#[tokio::test]
async fn snapshots_block_volume_deletion() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    let snapshot = cluster
        .service
        .create_snapshot(&CreateSnapshot {
            uuid: SnapshotId::new(),
            volume: volume.uuid.clone(),
        })
        .await
        .unwrap();

    let error = cluster
        .service
        .destroy_volume(&DestroyVolume {
            uuid: volume.uuid.clone(),
        })
        .await
        .expect_err("snapshots pin the volume");
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    cluster
        .service
        .destroy_snapshot(&DestroySnapshot {
            uuid: snapshot.uuid.clone(),
        })
        .await
        .unwrap();
    cluster
        .service
        .destroy_volume(&DestroyVolume {
            uuid: volume.uuid.clone(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn restart_resolves_interrupted_operations() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;

    // simulate a crash mid-migration: the record carries an unresolved
    // operation log and an in-flight migration status
    let mut stuck = cluster.service.get_volume(&volume.uuid).unwrap();
    stuck.migration = MigrationStatus::Migrating;
    stuck.operation = Some(VolumeOperationState {
        operation: VolumeOperation::Migrate(MigrateOperation::new(Cluster::beta_host())),
        result: None,
    });
    let mut store = cluster.store.clone();
    store.put_obj(&stuck).await.unwrap();

    // a fresh process over the same store
    let registry = Registry::new(
        Default::default(),
        store,
        Arc::new(MemQuotas::default()),
        Arc::new(LogNotifier::default()),
    );
    registry.start().await;

    let restored = registry.specs().volume_clone(&volume.uuid).unwrap();
    assert!(restored.operation.is_none());
    assert_eq!(restored.status, VolumeStatus::Available);
    assert_eq!(restored.migration, MigrationStatus::Error);
}

#[tokio::test]
async fn create_retry_with_different_parameters_is_refused() {
    let cluster = Cluster::new();
    cluster.alpha.configure(|state| state.fail_create = true);
    let request = cluster.create_request();
    cluster
        .service
        .create_volume(&request)
        .await
        .expect_err("backend creation fails");

    // the errored record is not `Creating` any more, so any retry conflicts
    let retry = CreateVolume {
        size: 20,
        ..request.clone()
    };
    let error = cluster
        .service
        .create_volume(&retry)
        .await
        .expect_err("the errored record is in the way");
    assert!(matches!(error, SvcError::AlreadyExists { .. }));
}
