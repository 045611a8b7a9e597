use std::fmt;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreResult;
use crate::capture::{CompressionType, FileKind, SensorDescription};
use crate::prelude::Resolution;
use crate::rollup::{BucketKey, RollupTile};

/// One processed capture, keyed by `(station_id, time_start)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFileInformation {
    pub station_id: String,
    pub time_start: DateTime<Utc>,
    pub compression: CompressionType,
    pub file_kind: FileKind,
    pub location: String,
    pub start_frequency_hz: u64,
    pub stop_frequency_hz: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub station_id: String,
    pub location: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub station_id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub time: DateTime<Utc>,
}

/// Last known configuration of a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfiguration {
    pub station_id: String,
    pub last_modified: DateTime<Utc>,
    pub hardware_info: String,
    pub sensors: Vec<SensorDescription>,
    pub storage_target: String,
}

/// Tabular store shared by all workers.
///
/// Every write is a keyed upsert; the store never arbitrates between writers,
/// callers serialise read-modify-write cycles through the lease lock.
#[async_trait]
pub trait MetadataStore: Send + Sync + fmt::Debug {
    async fn upsert_scan_file(&self, info: ScanFileInformation) -> StoreResult<()>;

    /// Scan-file rows of a station, oldest first.
    async fn scan_files(&self, station_id: &str) -> StoreResult<Vec<ScanFileInformation>>;

    async fn latest_scan_file(&self, station_id: &str) -> StoreResult<Option<ScanFileInformation>>;

    /// Remove rows of `kind` whose `time_start` is before `cutoff`.
    async fn delete_scan_files_before(&self, kind: FileKind, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Stored tiles of one bucket whose index falls in `tiles`.
    async fn rollup_tiles(&self, key: &BucketKey, tiles: RangeInclusive<u64>) -> StoreResult<Vec<RollupTile>>;

    async fn upsert_rollup_tiles(&self, key: &BucketKey, tiles: Vec<RollupTile>) -> StoreResult<()>;

    async fn rollup_buckets(&self, station_id: &str, resolution: Resolution) -> StoreResult<Vec<BucketKey>>;

    /// Remove every tile of `resolution` buckets starting before `cutoff`.
    async fn delete_rollups_before(&self, resolution: Resolution, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    async fn station_configuration(&self, station_id: &str) -> StoreResult<Option<StationConfiguration>>;

    async fn upsert_station_configuration(&self, config: StationConfiguration) -> StoreResult<()>;

    /// Overwrite only the hardware text of an existing configuration.
    async fn patch_hardware_info(&self, station_id: &str, hardware_info: &str) -> StoreResult<()>;

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()>;

    async fn failures_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<FailureRecord>>;

    async fn record_health(&self, status: HealthStatus) -> StoreResult<()>;

    async fn health_statuses(&self) -> StoreResult<Vec<HealthStatus>>;

    /// Remove failure and health rows older than `cutoff`.
    async fn delete_log_rows_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
