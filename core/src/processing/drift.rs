use log::debug;

use crate::capture::ConfigBlock;
use crate::prelude::CoreResult;
use crate::store::{MetadataStore, StationConfiguration};
use crate::telemetry::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationChange {
    Unchanged,
    /// Only the hardware description moved.
    HardwarePatched,
    Replaced,
}

/// Bring the stored station configuration in line with a capture's config block.
///
/// A newer `config_modified` replaces the whole row and notifies the monitor.
/// Otherwise a differing hardware text is patched on its own. Older or equal
/// configurations never overwrite what is stored.
pub async fn reconcile_configuration(
    metadata: &dyn MetadataStore,
    monitor: &dyn Monitor,
    station_id: &str,
    config: &ConfigBlock,
    storage_target: &str,
) -> CoreResult<ConfigurationChange> {
    let stored = metadata.station_configuration(station_id).await?;

    let newer = stored
        .as_ref()
        .map_or(true, |s| config.config_modified > s.last_modified);
    if newer {
        let current = StationConfiguration {
            station_id: station_id.to_string(),
            last_modified: config.config_modified,
            hardware_info: config.hardware_info.clone(),
            sensors: config.sensors.clone(),
            storage_target: storage_target.to_string(),
        };
        metadata.upsert_station_configuration(current.clone()).await?;
        monitor
            .station_configuration_changed(stored.as_ref(), &current)
            .await;
        return Ok(ConfigurationChange::Replaced);
    }

    match stored {
        Some(stored) if stored.hardware_info != config.hardware_info => {
            debug!(
                "station {} hardware changed to {:?}",
                station_id, config.hardware_info
            );
            metadata
                .patch_hardware_info(station_id, &config.hardware_info)
                .await?;
            Ok(ConfigurationChange::HardwarePatched)
        }
        _ => Ok(ConfigurationChange::Unchanged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SensorDescription;
    use crate::store::InMemoryMetadataStore;
    use crate::telemetry::StoreMonitor;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn config(modified_days: i64, hardware: &str) -> ConfigBlock {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ConfigBlock {
            station_id: "st".into(),
            timestamp: base + Duration::days(30),
            config_modified: base + Duration::days(modified_days),
            hardware_info: hardware.into(),
            sensors: vec![SensorDescription {
                sensor_id: 1,
                start_frequency_hz: 1,
                stop_frequency_hz: 2,
                step_hz: 1,
            }],
        }
    }

    #[tokio::test]
    async fn drift_decisions() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let monitor = StoreMonitor::new(metadata.clone());
        let run = |c: ConfigBlock| {
            let metadata = metadata.clone();
            let monitor = monitor.clone();
            async move { reconcile_configuration(metadata.as_ref(), &monitor, "st", &c, "west").await.unwrap() }
        };

        assert_eq!(run(config(1, "v1")).await, ConfigurationChange::Replaced);
        assert_eq!(run(config(1, "v1")).await, ConfigurationChange::Unchanged);
        assert_eq!(metadata.configuration_writes(), 1);

        assert_eq!(run(config(1, "v2")).await, ConfigurationChange::HardwarePatched);
        // An older config block must not roll the sensors back, only the text.
        assert_eq!(run(config(0, "v3")).await, ConfigurationChange::HardwarePatched);
        assert_eq!(run(config(2, "v3")).await, ConfigurationChange::Replaced);
        assert_eq!(metadata.configuration_writes(), 4);

        let stored = metadata.station_configuration("st").await.unwrap().unwrap();
        assert_eq!(stored.hardware_info, "v3");
        assert_eq!(stored.storage_target, "west");
    }
}
