//! Singleton jobs triggered by their own queue messages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::context::IngestContext;
use crate::prelude::CoreResult;
use crate::store::{HealthStatus, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub stale_stations: usize,
    pub failing_stations: usize,
}

/// Looks for stations that went quiet or started failing.
///
/// Failures are counted since the previous check, so concurrent triggers on
/// one worker are serialised on the check time.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl HealthMonitor {
    pub async fn run(&self, ctx: &IngestContext) -> CoreResult<HealthReport> {
        let mut last_check = self.last_check.lock().await;
        let now = ctx.clock.now();
        let stale_after = ctx.settings.health.stale_station_after();
        let since = last_check.unwrap_or(now - stale_after);

        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        for failure in ctx.metadata.failures_since(since).await? {
            *failures.entry(failure.station_id).or_default() += 1;
        }

        let mut report = HealthReport::default();
        for station in ctx.stations.stations() {
            let latest = ctx.metadata.latest_scan_file(&station.station_id).await?;
            let quiet = latest.as_ref().map_or(true, |file| now - file.time_start > stale_after);
            if quiet {
                report.stale_stations += 1;
                let description = match latest {
                    Some(file) => format!("last scan file started at {}", file.time_start),
                    None => "no scan file has been processed".to_string(),
                };
                ctx.monitor
                    .report_health_status(HealthStatus {
                        station_id: station.station_id.clone(),
                        severity: Severity::Warning,
                        title: "No recent data".to_string(),
                        description,
                        time: now,
                    })
                    .await;
            }

            if let Some(&count) = failures.get(&station.station_id) {
                report.failing_stations += 1;
                ctx.monitor
                    .report_health_status(HealthStatus {
                        station_id: station.station_id.clone(),
                        severity: Severity::Error,
                        title: "Processing failures".to_string(),
                        description: format!("{} failures since {}", count, since),
                        time: now,
                    })
                    .await;
            }
        }

        *last_check = Some(now);
        info!(
            "health check: {} stale, {} failing of {} stations",
            report.stale_stations,
            report.failing_stations,
            ctx.stations.len()
        );
        Ok(report)
    }
}

/// Check each station's storage target. Returns the number of stations whose
/// target did not answer.
pub async fn check_station_availability(ctx: &IngestContext) -> CoreResult<usize> {
    let now = ctx.clock.now();
    let mut unreachable = 0;
    for station in ctx.stations.stations() {
        let store = ctx.target(&station.storage_target)?;
        let (severity, title, description) = match store.list_containers().await {
            Ok(containers) => (
                Severity::Information,
                "Storage reachable",
                format!("{} containers on {}", containers.len(), station.storage_target),
            ),
            Err(err) => {
                unreachable += 1;
                (
                    Severity::Error,
                    "Storage unreachable",
                    format!("{}: {}", station.storage_target, err),
                )
            }
        };
        ctx.monitor
            .report_health_status(HealthStatus {
                station_id: station.station_id.clone(),
                severity,
                title: title.to_string(),
                description,
                time: now,
            })
            .await;
    }
    Ok(unreachable)
}

/// Re-validate access to every storage target. Returns how many answered.
pub async fn refresh_shared_access(ctx: &IngestContext) -> usize {
    let mut refreshed = 0;
    for (name, store) in ctx.targets() {
        match store.list_containers().await {
            Ok(containers) => {
                refreshed += 1;
                info!("access to {} confirmed ({} containers)", name, containers.len());
            }
            Err(err) => warn!("access to {} failed: {}", name, err),
        }
    }
    refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CompressionType, FileKind};
    use crate::clock::{Clock, ManualClock};
    use crate::context::IngestSettings;
    use crate::store::{
        FailureRecord, Fault, InMemoryMetadataStore, InMemoryObjectStore, MetadataStore, RetryPolicy,
        ScanFileInformation, StoreError,
    };
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    struct Fixture {
        ctx: Arc<IngestContext>,
        metadata: Arc<InMemoryMetadataStore>,
        objects: Arc<InMemoryObjectStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let objects = Arc::new(InMemoryObjectStore::new("west", clock.clone()));
        let settings = IngestSettings {
            retry: RetryPolicy::none(),
            ..IngestSettings::default()
        };
        let ctx = IngestContext::builder(metadata.clone(), clock.clone())
            .target(objects.clone())
            .station("fresh", "west")
            .station("quiet", "west")
            .settings(settings)
            .build()
            .unwrap();
        Fixture {
            ctx,
            metadata,
            objects,
            clock,
        }
    }

    fn scan_file(station_id: &str, time_start: DateTime<Utc>) -> ScanFileInformation {
        ScanFileInformation {
            station_id: station_id.into(),
            time_start,
            compression: CompressionType::None,
            file_kind: FileKind::Scan,
            location: format!("scans/{}/x.bin", station_id),
            start_frequency_hz: 0,
            stop_frequency_hz: 0,
        }
    }

    fn statuses_for(statuses: &[HealthStatus], station_id: &str, severity: Severity) -> usize {
        statuses
            .iter()
            .filter(|s| s.station_id == station_id && s.severity == severity)
            .count()
    }

    #[tokio::test]
    async fn quiet_stations_get_a_warning() {
        let f = fixture();
        let now = f.clock.now();
        f.metadata
            .upsert_scan_file(scan_file("fresh", now - Duration::hours(1)))
            .await
            .unwrap();
        f.metadata
            .upsert_scan_file(scan_file("quiet", now - Duration::hours(7)))
            .await
            .unwrap();

        let report = f.ctx.health.run(&f.ctx).await.unwrap();
        assert_eq!(report.stale_stations, 1);

        let statuses = f.metadata.health_statuses().await.unwrap();
        assert_eq!(statuses_for(&statuses, "quiet", Severity::Warning), 1);
        assert_eq!(statuses_for(&statuses, "fresh", Severity::Warning), 0);
    }

    #[tokio::test]
    async fn failures_are_only_counted_once() {
        let f = fixture();
        f.metadata
            .record_failure(FailureRecord {
                station_id: "fresh".into(),
                location: "scans/fresh/x.bin".into(),
                message: "boom".into(),
                time: f.clock.now() - Duration::minutes(5),
            })
            .await
            .unwrap();

        assert_eq!(f.ctx.health.run(&f.ctx).await.unwrap().failing_stations, 1);
        f.clock.advance(Duration::minutes(10));
        assert_eq!(f.ctx.health.run(&f.ctx).await.unwrap().failing_stations, 0);
    }

    #[tokio::test]
    async fn unreachable_targets_are_reported_per_station() {
        let f = fixture();
        f.objects
            .inject(Fault::new("list_containers", StoreError::connection("refused")).times(1));

        let unreachable = check_station_availability(&f.ctx).await.unwrap();
        assert_eq!(unreachable, 1);
        let statuses = f.metadata.health_statuses().await.unwrap();
        assert_eq!(statuses.iter().filter(|s| s.severity == Severity::Error).count(), 1);
        assert_eq!(
            statuses.iter().filter(|s| s.severity == Severity::Information).count(),
            1
        );
    }

    #[tokio::test]
    async fn access_refresh_counts_answering_targets() {
        let f = fixture();
        assert_eq!(refresh_shared_access(&f.ctx).await, 1);
        f.objects
            .inject(Fault::new("list_containers", StoreError::timeout("slow")).times(1));
        assert_eq!(refresh_shared_access(&f.ctx).await, 0);
    }
}
