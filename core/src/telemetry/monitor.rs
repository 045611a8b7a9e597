use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};

use crate::store::{FailureRecord, HealthStatus, MetadataStore, Severity, StationConfiguration};

/// Outward notifications about processing and station health.
///
/// Implementations swallow their own errors; reporting must never fail the
/// work being reported on.
#[async_trait]
pub trait Monitor: Send + Sync + fmt::Debug {
    async fn record_processing_failure(&self, failure: FailureRecord);

    async fn report_health_status(&self, status: HealthStatus);

    async fn station_configuration_changed(&self, previous: Option<&StationConfiguration>, current: &StationConfiguration);
}

/// Persists failures and health rows to the metadata store and logs them.
#[derive(Debug, Clone)]
pub struct StoreMonitor {
    metadata: Arc<dyn MetadataStore>,
}

impl StoreMonitor {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl Monitor for StoreMonitor {
    async fn record_processing_failure(&self, failure: FailureRecord) {
        warn!(
            "processing failed for station {} file {}: {}",
            failure.station_id, failure.location, failure.message
        );
        if let Err(err) = self.metadata.record_failure(failure).await {
            error!("could not persist failure record: {}", err);
        }
    }

    async fn report_health_status(&self, status: HealthStatus) {
        match status.severity {
            Severity::Information => info!("{}: {} ({})", status.station_id, status.title, status.description),
            Severity::Warning => warn!("{}: {} ({})", status.station_id, status.title, status.description),
            Severity::Error => error!("{}: {} ({})", status.station_id, status.title, status.description),
        }
        if let Err(err) = self.metadata.record_health(status).await {
            error!("could not persist health status: {}", err);
        }
    }

    async fn station_configuration_changed(&self, previous: Option<&StationConfiguration>, current: &StationConfiguration) {
        match previous {
            Some(previous) => info!(
                "station {} configuration changed ({} -> {}), {} sensors",
                current.station_id,
                previous.last_modified,
                current.last_modified,
                current.sensors.len()
            ),
            None => info!(
                "station {} configuration recorded, {} sensors",
                current.station_id,
                current.sensors.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fault, InMemoryMetadataStore, StoreError};
    use chrono::Utc;

    #[tokio::test]
    async fn failures_are_persisted() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let monitor = StoreMonitor::new(metadata.clone());
        monitor
            .record_processing_failure(FailureRecord {
                station_id: "st".into(),
                location: "scans/x".into(),
                message: "bad magic".into(),
                time: Utc::now(),
            })
            .await;
        assert_eq!(metadata.failures().len(), 1);
    }

    #[tokio::test]
    async fn storage_errors_are_swallowed() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.inject(Fault::new("record_health", StoreError::internal("down")));
        let monitor = StoreMonitor::new(metadata.clone());
        monitor
            .report_health_status(HealthStatus {
                station_id: "st".into(),
                severity: Severity::Error,
                title: "t".into(),
                description: "d".into(),
                time: Utc::now(),
            })
            .await;
        assert!(metadata.health_statuses().await.unwrap().is_empty());
    }
}
