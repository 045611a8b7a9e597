//! Retry for transient storage failures, applied as a decorator around any
//! [`ObjectStore`] or [`MetadataStore`].

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::error::StoreResult;
use super::metadata::{
    FailureRecord, HealthStatus, MetadataStore, ScanFileInformation, StationConfiguration,
};
use super::object::{ObjectInfo, ObjectStore};
use crate::capture::FileKind;
use crate::prelude::Resolution;
use crate::rollup::{BucketKey, RollupTile};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> StdDuration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64);
        StdDuration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryingObjectStore {
    inner: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl RetryingObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ObjectStore for RetryingObjectStore {
    fn target(&self) -> &str {
        self.inner.target()
    }

    async fn list_containers(&self) -> StoreResult<Vec<String>> {
        self.policy
            .run("list_containers", || self.inner.list_containers())
            .await
    }

    async fn exists(&self, container: &str, name: &str) -> StoreResult<bool> {
        self.policy
            .run("exists", || self.inner.exists(container, name))
            .await
    }

    async fn upload(&self, container: &str, name: &str, data: Vec<u8>, overwrite: bool) -> StoreResult<()> {
        self.policy
            .run("upload", || {
                self.inner.upload(container, name, data.clone(), overwrite)
            })
            .await
    }

    async fn download(&self, container: &str, name: &str) -> StoreResult<Vec<u8>> {
        self.policy
            .run("download", || self.inner.download(container, name))
            .await
    }

    async fn properties(&self, container: &str, name: &str) -> StoreResult<ObjectInfo> {
        self.policy
            .run("properties", || self.inner.properties(container, name))
            .await
    }

    async fn list(&self, container: &str) -> StoreResult<Vec<ObjectInfo>> {
        self.policy.run("list", || self.inner.list(container)).await
    }

    async fn delete_if_exists(&self, container: &str, name: &str) -> StoreResult<bool> {
        self.policy
            .run("delete_if_exists", || self.inner.delete_if_exists(container, name))
            .await
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        proposed_id: &str,
        duration: Option<Duration>,
    ) -> StoreResult<String> {
        self.policy
            .run("acquire_lease", || {
                self.inner.acquire_lease(container, name, proposed_id, duration)
            })
            .await
    }

    async fn renew_lease(&self, container: &str, name: &str, lease_id: &str) -> StoreResult<()> {
        self.policy
            .run("renew_lease", || self.inner.renew_lease(container, name, lease_id))
            .await
    }

    async fn release_lease(&self, container: &str, name: &str, lease_id: &str) -> StoreResult<()> {
        self.policy
            .run("release_lease", || self.inner.release_lease(container, name, lease_id))
            .await
    }

    async fn break_lease(&self, container: &str, name: &str, if_version: Option<u64>) -> StoreResult<()> {
        self.policy
            .run("break_lease", || self.inner.break_lease(container, name, if_version))
            .await
    }

    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        lease_id: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<()> {
        self.policy
            .run("set_metadata", || {
                self.inner
                    .set_metadata(container, name, lease_id, metadata.clone())
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct RetryingMetadataStore {
    inner: Arc<dyn MetadataStore>,
    policy: RetryPolicy,
}

impl RetryingMetadataStore {
    pub fn new(inner: Arc<dyn MetadataStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl MetadataStore for RetryingMetadataStore {
    async fn upsert_scan_file(&self, info: ScanFileInformation) -> StoreResult<()> {
        self.policy
            .run("upsert_scan_file", || self.inner.upsert_scan_file(info.clone()))
            .await
    }

    async fn scan_files(&self, station_id: &str) -> StoreResult<Vec<ScanFileInformation>> {
        self.policy
            .run("scan_files", || self.inner.scan_files(station_id))
            .await
    }

    async fn latest_scan_file(&self, station_id: &str) -> StoreResult<Option<ScanFileInformation>> {
        self.policy
            .run("latest_scan_file", || self.inner.latest_scan_file(station_id))
            .await
    }

    async fn delete_scan_files_before(&self, kind: FileKind, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.policy
            .run("delete_scan_files_before", || {
                self.inner.delete_scan_files_before(kind, cutoff)
            })
            .await
    }

    async fn rollup_tiles(&self, key: &BucketKey, tiles: RangeInclusive<u64>) -> StoreResult<Vec<RollupTile>> {
        self.policy
            .run("rollup_tiles", || self.inner.rollup_tiles(key, tiles.clone()))
            .await
    }

    async fn upsert_rollup_tiles(&self, key: &BucketKey, tiles: Vec<RollupTile>) -> StoreResult<()> {
        self.policy
            .run("upsert_rollup_tiles", || {
                self.inner.upsert_rollup_tiles(key, tiles.clone())
            })
            .await
    }

    async fn rollup_buckets(&self, station_id: &str, resolution: Resolution) -> StoreResult<Vec<BucketKey>> {
        self.policy
            .run("rollup_buckets", || self.inner.rollup_buckets(station_id, resolution))
            .await
    }

    async fn delete_rollups_before(&self, resolution: Resolution, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.policy
            .run("delete_rollups_before", || {
                self.inner.delete_rollups_before(resolution, cutoff)
            })
            .await
    }

    async fn station_configuration(&self, station_id: &str) -> StoreResult<Option<StationConfiguration>> {
        self.policy
            .run("station_configuration", || {
                self.inner.station_configuration(station_id)
            })
            .await
    }

    async fn upsert_station_configuration(&self, config: StationConfiguration) -> StoreResult<()> {
        self.policy
            .run("upsert_station_configuration", || {
                self.inner.upsert_station_configuration(config.clone())
            })
            .await
    }

    async fn patch_hardware_info(&self, station_id: &str, hardware_info: &str) -> StoreResult<()> {
        self.policy
            .run("patch_hardware_info", || {
                self.inner.patch_hardware_info(station_id, hardware_info)
            })
            .await
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        self.policy
            .run("record_failure", || self.inner.record_failure(record.clone()))
            .await
    }

    async fn failures_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<FailureRecord>> {
        self.policy
            .run("failures_since", || self.inner.failures_since(since))
            .await
    }

    async fn record_health(&self, status: HealthStatus) -> StoreResult<()> {
        self.policy
            .run("record_health", || self.inner.record_health(status.clone()))
            .await
    }

    async fn health_statuses(&self) -> StoreResult<Vec<HealthStatus>> {
        self.policy
            .run("health_statuses", || self.inner.health_statuses())
            .await
    }

    async fn delete_log_rows_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.policy
            .run("delete_log_rows_before", || self.inner.delete_log_rows_before(cutoff))
            .await
    }
}
