//! Shared services handed explicitly to every worker and job.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::ingest::jobs::HealthMonitor;
use crate::lease::LeaseConfig;
use crate::prelude::{CoreError, CoreResult};
use crate::processing::{StationEntry, StationRegistry};
use crate::retention::RetentionConfig;
use crate::rollup::{FrequencyGrid, RuleExecution};
use crate::store::{MetadataStore, ObjectStore, RetryPolicy, RetryingMetadataStore, RetryingObjectStore};
use crate::telemetry::{MetricsRecorder, Monitor, StoreMonitor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// A station with no scan file for this long is reported as a warning.
    pub stale_station_after_hours: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_station_after_hours: 6,
        }
    }
}

impl HealthConfig {
    pub fn stale_station_after(&self) -> Duration {
        Duration::hours(self.stale_station_after_hours)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    pub grid: FrequencyGrid,
    pub lease: LeaseConfig,
    pub retry: RetryPolicy,
    pub execution: RuleExecution,
    pub retention: RetentionConfig,
    pub health: HealthConfig,
    pub poll_interval: StdDuration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            grid: FrequencyGrid::default(),
            lease: LeaseConfig::default(),
            retry: RetryPolicy::default(),
            execution: RuleExecution::default(),
            retention: RetentionConfig::default(),
            health: HealthConfig::default(),
            poll_interval: StdDuration::from_secs(1),
        }
    }
}

pub struct IngestContext {
    pub metadata: Arc<dyn MetadataStore>,
    targets: BTreeMap<String, Arc<dyn ObjectStore>>,
    pub stations: StationRegistry,
    pub monitor: Arc<dyn Monitor>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsRecorder>,
    pub health: HealthMonitor,
    pub settings: IngestSettings,
}

impl IngestContext {
    pub fn builder(metadata: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>) -> IngestContextBuilder {
        IngestContextBuilder {
            metadata,
            clock,
            targets: Vec::new(),
            stations: Vec::new(),
            monitor: None,
            metrics: None,
            settings: IngestSettings::default(),
        }
    }

    pub fn target(&self, name: &str) -> CoreResult<Arc<dyn ObjectStore>> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownTarget(name.to_string()))
    }

    /// Object store holding `station_id`'s uploads.
    pub fn target_for_station(&self, station_id: &str) -> CoreResult<Arc<dyn ObjectStore>> {
        self.target(self.stations.storage_target(station_id)?)
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, &Arc<dyn ObjectStore>)> {
        self.targets.iter().map(|(name, store)| (name.as_str(), store))
    }
}

pub struct IngestContextBuilder {
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    targets: Vec<Arc<dyn ObjectStore>>,
    stations: Vec<StationEntry>,
    monitor: Option<Arc<dyn Monitor>>,
    metrics: Option<Arc<MetricsRecorder>>,
    settings: IngestSettings,
}

impl IngestContextBuilder {
    pub fn target(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.targets.push(store);
        self
    }

    pub fn station(mut self, station_id: impl Into<String>, storage_target: impl Into<String>) -> Self {
        self.stations.push(StationEntry {
            station_id: station_id.into(),
            storage_target: storage_target.into(),
        });
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(mut self, settings: IngestSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wrap every backend in the retry policy and check that each station
    /// points at a configured target.
    pub fn build(self) -> CoreResult<Arc<IngestContext>> {
        self.settings.grid.validate()?;
        let retry = self.settings.retry.clone();

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(RetryingMetadataStore::new(self.metadata, retry.clone()));
        let targets: BTreeMap<String, Arc<dyn ObjectStore>> = self
            .targets
            .into_iter()
            .map(|store| {
                let name = store.target().to_string();
                let wrapped: Arc<dyn ObjectStore> = Arc::new(RetryingObjectStore::new(store, retry.clone()));
                (name, wrapped)
            })
            .collect();

        let stations = StationRegistry::new(self.stations);
        if let Some(orphan) = stations
            .stations()
            .find(|entry| !targets.contains_key(&entry.storage_target))
        {
            return Err(CoreError::Configuration(format!(
                "station {} uses unknown storage target {}",
                orphan.station_id, orphan.storage_target
            )));
        }

        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(StoreMonitor::new(metadata.clone())));
        Ok(Arc::new(IngestContext {
            metadata,
            targets,
            stations,
            monitor,
            clock: self.clock,
            metrics: self.metrics.unwrap_or_default(),
            health: HealthMonitor::default(),
            settings: self.settings,
        }))
    }
}
