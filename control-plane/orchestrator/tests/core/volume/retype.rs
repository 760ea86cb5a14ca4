//! Retype scenarios: the no-op short-circuit, in-place driver retypes,
//! retype with data movement, and the quota rollback guarantees.

use crate::testlib::Cluster;
use orchestrator::{
    quota::{QUOTA_GIGABYTES, QUOTA_VOLUMES},
    SvcError,
};
use std::collections::HashMap;
use vol_port::{
    store::volume_type::{VolumeTypeSpec, SPEC_REPLICATION},
    transport::{
        CreateSnapshot, MigrationPolicy, MigrationStatus, RetypeVolume, SnapshotId, VolumeStatus,
        VolumeTypeId,
    },
};

fn volume_type(id: &str, specs: &[(&str, &str)]) -> VolumeTypeSpec {
    VolumeTypeSpec {
        id: VolumeTypeId::from(id),
        name: id.to_string(),
        extra_specs: specs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// A cluster with a `silver` and a `gold` type whose diff requires a
/// migration (QoS change), and a typed volume on the alpha backend.
async fn typed_cluster(
    limits: HashMap<String, i64>,
) -> (Cluster, vol_port::store::volume::VolumeSpec) {
    let cluster = Cluster::with_limits(limits);
    cluster
        .service
        .register_volume_type(volume_type("silver", &[("qos:iops", "100")]))
        .await
        .unwrap();
    cluster
        .service
        .register_volume_type(volume_type("gold", &[("qos:iops", "1000")]))
        .await
        .unwrap();

    let mut request = cluster.create_request();
    request.volume_type = Some(VolumeTypeId::from("silver"));
    let volume = cluster.service.create_volume(&request).await.unwrap();
    (cluster, volume)
}

#[tokio::test]
async fn noop_retype_short_circuits() {
    let cluster = Cluster::new();
    cluster
        .service
        .register_volume_type(volume_type("silver", &[("vendor:tier", "7200rpm")]))
        .await
        .unwrap();
    cluster
        .service
        .register_volume_type(volume_type("shiny", &[("vendor:tier", "ssd")]))
        .await
        .unwrap();

    let mut request = cluster.create_request();
    request.volume_type = Some(VolumeTypeId::from("silver"));
    let volume = cluster.service.create_volume(&request).await.unwrap();
    let creates = cluster.alpha.calls().len();

    let volume = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("shiny"),
            destination: None,
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .unwrap();

    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("shiny")));
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::None);
    // the backends were not involved at all: no driver retype, no copy
    assert_eq!(cluster.alpha.calls().len(), creates);
    assert!(cluster.beta.calls().is_empty());
}

#[tokio::test]
async fn in_place_retype_asks_the_driver() {
    let (cluster, volume) = typed_cluster(HashMap::new()).await;
    cluster.alpha.configure(|state| state.retype_handled = true);

    let volume = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("gold"),
            destination: None,
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .unwrap();

    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("gold")));
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::None);
    assert!(cluster.alpha.called(&format!("retype:{}", volume.uuid)));
}

#[tokio::test]
async fn unhandled_in_place_retype_fails_restored() {
    let (cluster, volume) = typed_cluster(HashMap::new()).await;

    let error = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("gold"),
            destination: None,
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .expect_err("the driver cannot satisfy the type in place");
    assert!(matches!(error, SvcError::MigrationFailed { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("silver")));
}

#[tokio::test]
async fn policy_never_fails_without_mutation() {
    let (cluster, volume) = typed_cluster(HashMap::new()).await;
    let calls_before = cluster.alpha.calls().len();

    let error = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("gold"),
            destination: Some(Cluster::beta_host()),
            policy: MigrationPolicy::Never,
        })
        .await
        .expect_err("the policy forbids the required migration");
    assert!(matches!(error, SvcError::MigrationFailed { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::None);
    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("silver")));
    assert!(volume.operation.is_none());
    assert_eq!(cluster.alpha.calls().len(), calls_before);
}

#[tokio::test]
async fn snapshots_block_retype_with_migration() {
    let (cluster, volume) = typed_cluster(HashMap::new()).await;
    cluster
        .service
        .create_snapshot(&CreateSnapshot {
            uuid: SnapshotId::new(),
            volume: volume.uuid.clone(),
        })
        .await
        .unwrap();

    let error = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("gold"),
            destination: Some(Cluster::beta_host()),
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .expect_err("snapshots pin the volume to its backend");
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("silver")));
}

#[tokio::test]
async fn replication_mismatch_blocks_retype_with_migration() {
    let cluster = Cluster::new();
    cluster
        .service
        .register_volume_type(volume_type("plain", &[]))
        .await
        .unwrap();
    cluster
        .service
        .register_volume_type(volume_type("replicated", &[(SPEC_REPLICATION, "true")]))
        .await
        .unwrap();

    let mut request = cluster.create_request();
    request.volume_type = Some(VolumeTypeId::from("plain"));
    let volume = cluster.service.create_volume(&request).await.unwrap();

    let error = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("replicated"),
            destination: Some(Cluster::beta_host()),
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .expect_err("replication cannot change across a migration");
    assert!(matches!(error, SvcError::InvalidVolume { .. }));
}

#[tokio::test]
async fn over_quota_retype_rolls_back() {
    let limits = HashMap::from([(format!("{QUOTA_GIGABYTES}_gold"), 5)]);
    let (cluster, volume) = typed_cluster(limits).await;
    cluster.alpha.configure(|state| state.retype_handled = true);

    let error = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("gold"),
            destination: None,
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .expect_err("the gold quota cannot hold the volume");
    assert!(matches!(error, SvcError::OverQuota { .. }));

    let volume = cluster.service.get_volume(&volume.uuid).unwrap();
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("silver")));
    // no gold usage was left behind
    assert_eq!(
        cluster
            .quotas
            .usage(&Cluster::project(), &format!("{QUOTA_GIGABYTES}_gold"))
            .await,
        (0, 0)
    );
    assert_eq!(
        cluster
            .quotas
            .usage(&Cluster::project(), &format!("{QUOTA_VOLUMES}_gold"))
            .await,
        (0, 0)
    );
}

#[tokio::test]
async fn retype_with_migration_moves_data_and_quota() {
    let (cluster, volume) = typed_cluster(HashMap::new()).await;

    let volume = cluster
        .service
        .retype_volume(&RetypeVolume {
            uuid: volume.uuid.clone(),
            new_type: VolumeTypeId::from("gold"),
            destination: Some(Cluster::beta_host()),
            policy: MigrationPolicy::OnDemand,
        })
        .await
        .unwrap();

    assert_eq!(volume.volume_type, Some(VolumeTypeId::from("gold")));
    assert_eq!(volume.host, Cluster::beta_host());
    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(volume.migration, MigrationStatus::Success);
    // the data moved through the generic copy, never a native offload
    assert!(!cluster.alpha.called("migrate:"));
    assert!(cluster.beta.called("create:"));
    // per-type accounting followed the volume
    assert_eq!(
        cluster
            .quotas
            .usage(&Cluster::project(), &format!("{QUOTA_GIGABYTES}_gold"))
            .await,
        (10, 0)
    );
    assert_eq!(
        cluster
            .quotas
            .usage(&Cluster::project(), &format!("{QUOTA_GIGABYTES}_silver"))
            .await,
        (0, 0)
    );
}
