//! Quota reservations.
//!
//! A reservation is an ephemeral hold of resource deltas against a project.
//! It is either committed into usage on success or rolled back on failure,
//! and is never persisted beyond the operation's lifetime.

use crate::SvcError;
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use tokio::sync::Mutex;
use vol_port::transport::{ProjectId, VolumeTypeId};

/// Quota resource counting volumes.
pub const QUOTA_VOLUMES: &str = "volumes";
/// Quota resource counting allocated gigabytes.
pub const QUOTA_GIGABYTES: &str = "gigabytes";

/// Resource deltas of one reservation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaDeltas {
    deltas: HashMap<String, i64>,
}

impl QuotaDeltas {
    /// Account one volume of `size` GiB.
    pub fn volume(size: u64) -> Self {
        Self::default().with_volume(size, None)
    }

    /// Add one volume of `size` GiB, accounted under its type as well when a
    /// type is given.
    pub fn with_volume(mut self, size: u64, volume_type: Option<&VolumeTypeId>) -> Self {
        self.add(QUOTA_VOLUMES, 1);
        self.add(QUOTA_GIGABYTES, size as i64);
        if let Some(volume_type) = volume_type {
            self.add(&format!("{QUOTA_VOLUMES}_{volume_type}"), 1);
            self.add(&format!("{QUOTA_GIGABYTES}_{volume_type}"), size as i64);
        }
        self
    }

    /// Remove one volume of `size` GiB, accounted under its type as well when
    /// a type is given.
    pub fn without_volume(mut self, size: u64, volume_type: Option<&VolumeTypeId>) -> Self {
        self.add(QUOTA_VOLUMES, -1);
        self.add(QUOTA_GIGABYTES, -(size as i64));
        if let Some(volume_type) = volume_type {
            self.add(&format!("{QUOTA_VOLUMES}_{volume_type}"), -1);
            self.add(&format!("{QUOTA_GIGABYTES}_{volume_type}"), -(size as i64));
        }
        self
    }

    /// Account a size change of an existing volume.
    pub fn resize(mut self, from: u64, to: u64, volume_type: Option<&VolumeTypeId>) -> Self {
        let delta = to as i64 - from as i64;
        self.add(QUOTA_GIGABYTES, delta);
        if let Some(volume_type) = volume_type {
            self.add(&format!("{QUOTA_GIGABYTES}_{volume_type}"), delta);
        }
        self
    }

    /// Move the per-type accounting of a volume from `old` to `new`, leaving
    /// the untyped totals alone.
    pub fn retype(
        mut self,
        size: u64,
        old: Option<&VolumeTypeId>,
        new: &VolumeTypeId,
    ) -> Self {
        self.add(&format!("{QUOTA_VOLUMES}_{new}"), 1);
        self.add(&format!("{QUOTA_GIGABYTES}_{new}"), size as i64);
        if let Some(old) = old {
            self.add(&format!("{QUOTA_VOLUMES}_{old}"), -1);
            self.add(&format!("{QUOTA_GIGABYTES}_{old}"), -(size as i64));
        }
        self
    }

    fn add(&mut self, resource: &str, delta: i64) {
        *self.deltas.entry(resource.to_string()).or_default() += delta;
    }

    /// The individual resource deltas.
    pub fn deltas(&self) -> &HashMap<String, i64> {
        &self.deltas
    }
}

/// An uncommitted quota hold. Handed back by `Quotas::reserve` and consumed
/// by exactly one of `commit` or `rollback`.
#[derive(Debug)]
pub struct ReservationToken {
    project: ProjectId,
    deltas: QuotaDeltas,
}

impl ReservationToken {
    /// The project the hold counts against.
    pub fn project(&self) -> &ProjectId {
        &self.project
    }
    /// The held deltas.
    pub fn deltas(&self) -> &QuotaDeltas {
        &self.deltas
    }
}

/// The quota subsystem: reservations are atomic with respect to other
/// reservations against the same project and resource.
#[async_trait]
pub trait Quotas: Send + Sync + std::fmt::Debug {
    /// Hold the deltas against the project, failing with `OverQuota` when any
    /// positive delta does not fit the project's limits.
    async fn reserve(
        &self,
        project: &ProjectId,
        deltas: QuotaDeltas,
    ) -> Result<ReservationToken, SvcError>;
    /// Fold the hold into the project's usage.
    async fn commit(&self, token: ReservationToken) -> Result<(), SvcError>;
    /// Release the hold, leaving usage untouched.
    async fn rollback(&self, token: ReservationToken) -> Result<(), SvcError>;
}

#[derive(Debug, Default)]
struct ProjectUsage {
    used: HashMap<String, i64>,
    reserved: HashMap<String, i64>,
}

/// In-process quota accounting with a flat per-resource limit table.
/// Resources without a configured limit are unlimited.
#[derive(Debug, Default)]
pub struct MemQuotas {
    limits: HashMap<String, i64>,
    usage: Mutex<HashMap<ProjectId, ProjectUsage>>,
}

impl MemQuotas {
    /// Quotas with the given per-resource limits.
    pub fn new(limits: HashMap<String, i64>) -> Self {
        Self {
            limits,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Current usage of a project's resource, committed and reserved.
    pub async fn usage(&self, project: &ProjectId, resource: &str) -> (i64, i64) {
        let usage = self.usage.lock().await;
        match usage.get(project) {
            Some(project) => (
                project.used.get(resource).copied().unwrap_or(0),
                project.reserved.get(resource).copied().unwrap_or(0),
            ),
            None => (0, 0),
        }
    }
}

#[async_trait]
impl Quotas for MemQuotas {
    async fn reserve(
        &self,
        project: &ProjectId,
        deltas: QuotaDeltas,
    ) -> Result<ReservationToken, SvcError> {
        let mut usage = self.usage.lock().await;
        let project_usage = usage.entry(project.clone()).or_default();

        let over: Vec<String> = deltas
            .deltas()
            .iter()
            .filter(|(resource, delta)| {
                let Some(limit) = self.limits.get(*resource) else {
                    return false;
                };
                let used = project_usage.used.get(*resource).copied().unwrap_or(0);
                let reserved = project_usage.reserved.get(*resource).copied().unwrap_or(0);
                **delta > 0 && used + reserved + **delta > *limit
            })
            .map(|(resource, _)| resource.clone())
            .sorted()
            .collect();
        if !over.is_empty() {
            return Err(SvcError::OverQuota { resources: over });
        }

        for (resource, delta) in deltas.deltas() {
            *project_usage.reserved.entry(resource.clone()).or_default() += delta;
        }
        Ok(ReservationToken {
            project: project.clone(),
            deltas,
        })
    }

    async fn commit(&self, token: ReservationToken) -> Result<(), SvcError> {
        let mut usage = self.usage.lock().await;
        let project_usage = usage.entry(token.project.clone()).or_default();
        for (resource, delta) in token.deltas.deltas() {
            *project_usage.reserved.entry(resource.clone()).or_default() -= delta;
            *project_usage.used.entry(resource.clone()).or_default() += delta;
        }
        Ok(())
    }

    async fn rollback(&self, token: ReservationToken) -> Result<(), SvcError> {
        let mut usage = self.usage.lock().await;
        let project_usage = usage.entry(token.project.clone()).or_default();
        for (resource, delta) in token.deltas.deltas() {
            *project_usage.reserved.entry(resource.clone()).or_default() -= delta;
        }
        Ok(())
    }
}
