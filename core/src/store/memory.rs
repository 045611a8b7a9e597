//! In-memory [`MetadataStore`] used by tests and the offline worker.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::error::{StoreError, StoreResult};
use super::fault::{Fault, FaultInjector};
use super::metadata::{
    FailureRecord, HealthStatus, MetadataStore, ScanFileInformation, StationConfiguration,
};
use crate::capture::FileKind;
use crate::prelude::Resolution;
use crate::rollup::{BucketKey, RollupTile};

#[derive(Debug, Default)]
struct Tables {
    scan_files: BTreeMap<(String, DateTime<Utc>), ScanFileInformation>,
    rollups: BTreeMap<BucketKey, BTreeMap<u64, RollupTile>>,
    stations: BTreeMap<String, StationConfiguration>,
    failures: Vec<FailureRecord>,
    health: Vec<HealthStatus>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    tables: Mutex<Tables>,
    configuration_writes: AtomicUsize,
    faults: FaultInjector,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.inject(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Number of configuration upserts and hardware patches applied so far.
    pub fn configuration_writes(&self) -> usize {
        self.configuration_writes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.tables.lock().failures.clone()
    }

    pub fn rollup_tile_count(&self) -> usize {
        self.tables.lock().rollups.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert_scan_file(&self, info: ScanFileInformation) -> StoreResult<()> {
        self.faults.check("upsert_scan_file", &info.station_id)?;
        let key = (info.station_id.clone(), info.time_start);
        self.tables.lock().scan_files.insert(key, info);
        Ok(())
    }

    async fn scan_files(&self, station_id: &str) -> StoreResult<Vec<ScanFileInformation>> {
        self.faults.check("scan_files", station_id)?;
        Ok(self
            .tables
            .lock()
            .scan_files
            .values()
            .filter(|info| info.station_id == station_id)
            .cloned()
            .collect())
    }

    async fn latest_scan_file(&self, station_id: &str) -> StoreResult<Option<ScanFileInformation>> {
        Ok(self.scan_files(station_id).await?.pop())
    }

    async fn delete_scan_files_before(&self, kind: FileKind, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.faults.check("delete_scan_files_before", "")?;
        let mut tables = self.tables.lock();
        let before = tables.scan_files.len();
        tables
            .scan_files
            .retain(|_, info| info.file_kind != kind || info.time_start >= cutoff);
        Ok(before - tables.scan_files.len())
    }

    async fn rollup_tiles(&self, key: &BucketKey, tiles: RangeInclusive<u64>) -> StoreResult<Vec<RollupTile>> {
        self.faults.check("rollup_tiles", &key.station_id)?;
        Ok(self
            .tables
            .lock()
            .rollups
            .get(key)
            .map(|stored| stored.range(tiles).map(|(_, tile)| tile.clone()).collect())
            .unwrap_or_default())
    }

    async fn upsert_rollup_tiles(&self, key: &BucketKey, tiles: Vec<RollupTile>) -> StoreResult<()> {
        self.faults.check("upsert_rollup_tiles", &key.station_id)?;
        let mut tables = self.tables.lock();
        let stored = tables.rollups.entry(key.clone()).or_default();
        for tile in tiles {
            stored.insert(tile.tile_index, tile);
        }
        Ok(())
    }

    async fn rollup_buckets(&self, station_id: &str, resolution: Resolution) -> StoreResult<Vec<BucketKey>> {
        Ok(self
            .tables
            .lock()
            .rollups
            .keys()
            .filter(|key| key.station_id == station_id && key.resolution == resolution)
            .cloned()
            .collect())
    }

    async fn delete_rollups_before(&self, resolution: Resolution, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.faults.check("delete_rollups_before", resolution.as_str())?;
        let mut tables = self.tables.lock();
        let mut removed = 0;
        tables.rollups.retain(|key, tiles| {
            let expired = key.resolution == resolution && key.bucket_start < cutoff;
            if expired {
                removed += tiles.len();
            }
            !expired
        });
        Ok(removed)
    }

    async fn station_configuration(&self, station_id: &str) -> StoreResult<Option<StationConfiguration>> {
        self.faults.check("station_configuration", station_id)?;
        Ok(self.tables.lock().stations.get(station_id).cloned())
    }

    async fn upsert_station_configuration(&self, config: StationConfiguration) -> StoreResult<()> {
        self.faults
            .check("upsert_station_configuration", &config.station_id)?;
        self.tables
            .lock()
            .stations
            .insert(config.station_id.clone(), config);
        self.configuration_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn patch_hardware_info(&self, station_id: &str, hardware_info: &str) -> StoreResult<()> {
        self.faults.check("patch_hardware_info", station_id)?;
        let mut tables = self.tables.lock();
        let config = tables.stations.get_mut(station_id).ok_or_else(|| {
            StoreError::not_found("station configuration")
                .with_operation("patch_hardware_info")
                .with_entity(station_id)
        })?;
        config.hardware_info = hardware_info.to_string();
        self.configuration_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        self.faults.check("record_failure", &record.station_id)?;
        self.tables.lock().failures.push(record);
        Ok(())
    }

    async fn failures_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<FailureRecord>> {
        Ok(self
            .tables
            .lock()
            .failures
            .iter()
            .filter(|record| record.time >= since)
            .cloned()
            .collect())
    }

    async fn record_health(&self, status: HealthStatus) -> StoreResult<()> {
        self.faults.check("record_health", &status.station_id)?;
        self.tables.lock().health.push(status);
        Ok(())
    }

    async fn health_statuses(&self) -> StoreResult<Vec<HealthStatus>> {
        Ok(self.tables.lock().health.clone())
    }

    async fn delete_log_rows_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.faults.check("delete_log_rows_before", "")?;
        let mut tables = self.tables.lock();
        let before = tables.failures.len() + tables.health.len();
        tables.failures.retain(|record| record.time >= cutoff);
        tables.health.retain(|status| status.time >= cutoff);
        Ok(before - tables.failures.len() - tables.health.len())
    }
}
