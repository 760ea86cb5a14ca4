//! Migration scenarios: native offload, the generic copy path, and the
//! restoration guarantees under failure injection at every step.

use crate::testlib::{Cluster, MigrateBehaviour};
use orchestrator::SvcError;
use vol_port::transport::{
    AttachVolume, DestroyVolume, MigrateVolume, MigrationStatus, VolumeStatus,
};

fn migrate_request(volume: &vol_port::store::volume::VolumeSpec) -> MigrateVolume {
    MigrateVolume {
        uuid: volume.uuid.clone(),
        destination: Cluster::beta_host(),
        force_copy: false,
    }
}

#[tokio::test]
async fn native_migration_moves_the_volume() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster
        .alpha
        .configure(|state| state.migrate = MigrateBehaviour::Move);

    let volume = cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .unwrap();

    assert_eq!(volume.host, Cluster::beta_host());
    assert_eq!(volume.migration, MigrationStatus::Success);
    assert_eq!(volume.status, VolumeStatus::Available);
    // no byte copy took place
    assert!(!cluster.beta.called("attach:"));
    assert!(!cluster.beta.called("create:"));
}

#[tokio::test]
async fn declined_native_migration_falls_back_to_generic_copy() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;

    let migrated = cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .unwrap();

    assert_eq!(migrated.host, Cluster::beta_host());
    assert_eq!(migrated.migration, MigrationStatus::Success);
    assert_eq!(migrated.status, VolumeStatus::Available);
    // the destination was created on beta and both ends took part in the copy
    assert!(cluster.beta.called("create:"));
    assert!(cluster.alpha.called("attach:"));
    assert!(cluster.beta.called("attach:"));
    // the surviving record adopted the new backend volume's identity
    assert!(migrated.provider_location.as_deref().unwrap().starts_with("beta/"));
    // the old backend volume is gone
    assert!(cluster.alpha.called(&format!("delete:{}", volume.uuid)));
    // exactly one record remains
    assert_eq!(cluster.service.volumes().len(), 1);
}

#[tokio::test]
async fn native_migration_failure_propagates_after_restoration() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster
        .alpha
        .configure(|state| state.migrate = MigrateBehaviour::Fail);

    cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("the driver raised");

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Error);
    assert!(volume.operation.is_none());
}

#[tokio::test]
async fn uninitialized_driver_fails_fast() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster.alpha.configure(|state| state.offline = true);

    let error = cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("driver is not ready");
    assert!(matches!(error, SvcError::DriverNotInitialized { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    // the status stays untouched, only the migration state machine errors
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Error);
    // nothing was started, so nothing was cleaned up or created
    assert!(!cluster.beta.called("create:"));
}

#[tokio::test]
async fn destination_create_failure_cleans_up() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster.beta.configure(|state| state.fail_create = true);

    let error = cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("the destination cannot be created");
    assert!(matches!(error, SvcError::MigrationFailed { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Error);
    // the half-created destination no longer exists
    assert_eq!(cluster.service.volumes().len(), 1);
}

#[tokio::test]
async fn destination_create_timeout_cleans_up() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster.beta.configure(|state| state.hang_create = true);

    let error = cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("the destination never comes online");
    assert!(matches!(error, SvcError::MigrationFailed { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Error);
    assert_eq!(cluster.service.volumes().len(), 1);
}

#[tokio::test]
async fn copy_failure_restores_the_source() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster.beta.configure(|state| state.fail_attach = true);

    cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("the copy cannot start");

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Error);
    assert!(volume.operation.is_none());
    // the destination backend volume was disposed of along with its record
    assert!(cluster.beta.called("delete:"));
    assert_eq!(cluster.service.volumes().len(), 1);
}

#[tokio::test]
async fn completion_failure_restores_and_keeps_the_target() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    // the copy lands, but deleting the old backend volume fails
    cluster.alpha.configure(|state| state.fail_delete = true);

    cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("completion cannot delete the old volume");

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Error);
    // the data already lives on the target; its record is left for the
    // operator rather than destroyed
    let records = cluster.service.volumes();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .any(|record| record.migration == MigrationStatus::Target(volume.uuid.clone())));
}

#[tokio::test]
async fn migration_preserves_the_attachment() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster
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

    let migrated = cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .unwrap();

    assert_eq!(migrated.status, VolumeStatus::InUse);
    assert_eq!(migrated.migration, MigrationStatus::Success);

    let attachments = cluster
        .service
        .registry()
        .specs()
        .volume_attachments(&volume.uuid);
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].instance_uuid.as_deref(), Some("instance-1"));
    assert_eq!(attachments[0].attached_host.as_deref(), Some("compute-1"));
    assert_eq!(attachments[0].mountpoint, "/dev/vdb");
    assert_eq!(attachments[0].volume, volume.uuid);
    // the copy and the completion swing both ran over the consumer's host
    assert!(cluster.beta.calls().iter().any(|call| {
        call.starts_with("attach:") && call.ends_with(":compute-1")
    }));
    assert!(cluster.alpha.called("detach:"));
}

#[tokio::test]
async fn mid_migration_records_can_be_deleted() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster.alpha.configure(|state| state.fail_delete = true);

    // leave a stuck target record behind
    cluster
        .service
        .migrate_volume(&migrate_request(&volume))
        .await
        .expect_err("completion cannot delete the old volume");
    let target = cluster
        .service
        .volumes()
        .into_iter()
        .find(|record| record.migration == MigrationStatus::Target(volume.uuid.clone()))
        .expect("target record");

    // the target sentinel record needs no further guards to delete
    cluster
        .service
        .destroy_volume(&DestroyVolume {
            uuid: target.uuid.clone(),
        })
        .await
        .unwrap();
    assert_eq!(cluster.service.volumes().len(), 1);
}

#[tokio::test]
async fn forced_copy_skips_the_native_path() {
    let cluster = Cluster::new();
    let volume = cluster.available_volume().await;
    cluster
        .alpha
        .configure(|state| state.migrate = MigrateBehaviour::Move);

    let request = MigrateVolume {
        uuid: volume.uuid.clone(),
        destination: Cluster::beta_host(),
        force_copy: true,
    };
    let migrated = cluster.service.migrate_volume(&request).await.unwrap();

    assert_eq!(migrated.migration, MigrationStatus::Success);
    // the driver was never asked to move the volume itself
    assert!(!cluster.alpha.called("migrate:"));
    assert!(cluster.beta.called("create:"));
}
