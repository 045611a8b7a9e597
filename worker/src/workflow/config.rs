use anyhow::Context;
use serde::{Deserialize, Serialize};
use spectrumcore::context::{HealthConfig, IngestSettings};
use spectrumcore::lease::LeaseConfig;
use spectrumcore::processing::StationEntry;
use spectrumcore::retention::RetentionConfig;
use spectrumcore::rollup::{FrequencyGrid, RuleExecution};
use spectrumcore::store::RetryPolicy;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub instances: usize,
    pub poll_interval_ms: u64,
    pub execution: RuleExecution,
    pub queue_visibility_secs: i64,
    /// Zero disables the timer for that job.
    pub health_check_interval_secs: u64,
    pub availability_interval_secs: u64,
    pub access_refresh_interval_secs: u64,
    pub retention_interval_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            instances: 1,
            poll_interval_ms: 1_000,
            execution: RuleExecution::Sequential,
            queue_visibility_secs: 300,
            health_check_interval_secs: 300,
            availability_interval_secs: 600,
            access_refresh_interval_secs: 3_600,
            retention_interval_secs: 86_400,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupSection {
    pub bin_width_hz: u64,
    pub tile_bins: usize,
}

impl Default for RollupSection {
    fn default() -> Self {
        let grid = FrequencyGrid::default();
        Self {
            bin_width_hz: grid.bin_width_hz,
            tile_bins: grid.tile_bins,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    pub lease: LeaseConfig,
    pub retry: RetryPolicy,
    pub rollup: RollupSection,
    pub retention: RetentionConfig,
    pub health: HealthConfig,
    pub stations: Vec<StationEntry>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerSection::default(),
            lease: LeaseConfig::default(),
            retry: RetryPolicy::default(),
            rollup: RollupSection::default(),
            retention: RetentionConfig::default(),
            health: HealthConfig::default(),
            stations: vec![StationEntry {
                station_id: "demo-1".into(),
                storage_target: "local".into(),
            }],
        }
    }
}

impl WorkerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading worker config {}", path_ref.display()))?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing worker config {}", path_ref.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.worker.instances > 0, "worker.instances must be at least 1");
        anyhow::ensure!(!self.stations.is_empty(), "no stations configured");
        self.grid().context("invalid rollup section")?;
        Ok(())
    }

    pub fn grid(&self) -> anyhow::Result<FrequencyGrid> {
        Ok(FrequencyGrid::new(self.rollup.bin_width_hz, self.rollup.tile_bins)?)
    }

    /// Distinct storage targets named by the stations.
    pub fn storage_targets(&self) -> BTreeSet<String> {
        self.stations
            .iter()
            .map(|station| station.storage_target.clone())
            .collect()
    }

    pub fn to_settings(&self) -> anyhow::Result<IngestSettings> {
        Ok(IngestSettings {
            grid: self.grid()?,
            lease: self.lease.clone(),
            retry: self.retry.clone(),
            execution: self.worker.execution,
            retention: self.retention.clone(),
            health: self.health.clone(),
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectrumcore::Resolution;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_describe_a_single_local_station() {
        let cfg = WorkerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.storage_targets().len(), 1);
        assert_eq!(cfg.to_settings().unwrap().lease.max_backoff_ms, 128_000);
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"worker:\n  instances: 3\n  execution: concurrent\n\
lease:\n  initial_backoff_ms: 250\n\
rollup:\n  bin_width_hz: 25000\n  tile_bins: 32\n\
retention:\n  raw_iq_days: 2\n  rollup_days:\n    raw: 10\n    hourly: 90\n\
stations:\n  - station_id: a\n    storage_target: west\n  - station_id: b\n    storage_target: east\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkerConfig::load(&path).unwrap();

        assert_eq!(cfg.worker.instances, 3);
        assert_eq!(cfg.worker.execution, RuleExecution::Concurrent);
        assert_eq!(cfg.lease.initial_backoff_ms, 250);
        assert_eq!(cfg.lease.max_backoff_ms, 128_000);
        assert_eq!(cfg.retention.scan_days, 365);
        assert_eq!(cfg.retention.rollup_days.get(&Resolution::Hourly), Some(&90));
        assert_eq!(cfg.grid().unwrap().tile_bins, 32);
        assert_eq!(cfg.storage_targets().len(), 2);
    }

    #[test]
    fn zero_instances_are_rejected() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"worker:\n  instances: 0\n").unwrap();
        let path = temp.into_temp_path();
        assert!(WorkerConfig::load(&path).is_err());
    }
}
