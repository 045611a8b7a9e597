//! Age-based cleanup of stored objects and metadata rows.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::capture::FileKind;
use crate::context::IngestContext;
use crate::prelude::Resolution;
use crate::store::object::{LOCK_CONTAINER, LOG_CONTAINER, RAW_IQ_CONTAINER, SCAN_CONTAINER};
use crate::store::{ObjectStore, StoreResult};

/// Retention windows in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub raw_iq_days: u32,
    pub scan_days: u32,
    pub lock_days: u32,
    pub log_days: u32,
    /// Rollup resolutions without an entry are kept forever.
    pub rollup_days: BTreeMap<Resolution, u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_iq_days: 7,
            scan_days: 365,
            lock_days: 1,
            log_days: 30,
            rollup_days: BTreeMap::from([(Resolution::Raw, 30)]),
        }
    }
}

impl RetentionConfig {
    /// Window for objects in `container`; `None` leaves the container alone.
    pub fn window_for_container(&self, container: &str) -> Option<Duration> {
        let days = match container {
            SCAN_CONTAINER => self.scan_days,
            RAW_IQ_CONTAINER => self.raw_iq_days,
            LOCK_CONTAINER => self.lock_days,
            LOG_CONTAINER => self.log_days,
            _ => return None,
        };
        Some(days_window(days))
    }

    pub fn window_for_kind(&self, kind: FileKind) -> Duration {
        match kind {
            FileKind::Scan => days_window(self.scan_days),
            FileKind::RawIq => days_window(self.raw_iq_days),
        }
    }
}

fn days_window(days: u32) -> Duration {
    Duration::days(i64::from(days))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub objects_deleted: usize,
    pub leases_broken: usize,
    pub rows_deleted: usize,
    pub errors: usize,
}

impl fmt::Display for RetentionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} objects deleted ({} leases broken), {} rows deleted, {} errors",
            self.objects_deleted, self.leases_broken, self.rows_deleted, self.errors
        )
    }
}

/// Delete everything older than its window. An item exactly at the cutoff is
/// kept. Failures are logged and counted and never stop the sweep.
pub async fn sweep(ctx: &IngestContext) -> RetentionReport {
    let now = ctx.clock.now();
    let config = &ctx.settings.retention;
    let mut report = RetentionReport::default();

    for (target, store) in ctx.targets() {
        if let Err(err) = sweep_target(store.as_ref(), config, now, &mut report).await {
            warn!("retention on {} stopped early: {}", target, err);
            report.errors += 1;
        }
    }

    for kind in [FileKind::Scan, FileKind::RawIq] {
        let cutoff = now - config.window_for_kind(kind);
        tally(
            ctx.metadata.delete_scan_files_before(kind, cutoff).await,
            &mut report,
            "scan-file rows",
        );
    }
    tally(
        ctx.metadata
            .delete_log_rows_before(now - days_window(config.log_days))
            .await,
        &mut report,
        "log rows",
    );
    for (&resolution, &days) in &config.rollup_days {
        tally(
            ctx.metadata
                .delete_rollups_before(resolution, now - days_window(days))
                .await,
            &mut report,
            resolution.as_str(),
        );
    }

    info!("retention sweep finished: {}", report);
    report
}

fn tally(result: StoreResult<usize>, report: &mut RetentionReport, what: &str) {
    match result {
        Ok(removed) => {
            debug!("retention removed {} {}", removed, what);
            report.rows_deleted += removed;
        }
        Err(err) => {
            warn!("retention could not delete {}: {}", what, err);
            report.errors += 1;
        }
    }
}

async fn sweep_target(
    store: &dyn ObjectStore,
    config: &RetentionConfig,
    now: DateTime<Utc>,
    report: &mut RetentionReport,
) -> StoreResult<()> {
    for container in store.list_containers().await? {
        let Some(window) = config.window_for_container(&container) else {
            debug!("retention skips container {} on {}", container, store.target());
            continue;
        };
        let cutoff = now - window;
        let objects = match store.list(&container).await {
            Ok(objects) => objects,
            Err(err) => {
                warn!("retention could not list {} on {}: {}", container, store.target(), err);
                report.errors += 1;
                continue;
            }
        };

        for object in objects.into_iter().filter(|o| o.last_modified < cutoff) {
            if object.is_leased() {
                // Only the lease the listing saw; a holder that took over since
                // keeps the object.
                match store
                    .break_lease(&container, &object.name, Some(object.version))
                    .await
                {
                    Ok(()) => report.leases_broken += 1,
                    Err(err) if err.is_conflict() => {
                        debug!("{}/{} changed hands since the listing, skipped", container, object.name);
                        continue;
                    }
                    Err(err) => {
                        warn!("retention could not break lease on {}/{}: {}", container, object.name, err);
                        report.errors += 1;
                        continue;
                    }
                }
            }
            match store.delete_if_exists(&container, &object.name).await {
                Ok(true) => report.objects_deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!("retention could not delete {}/{}: {}", container, object.name, err);
                    report.errors += 1;
                }
            }
        }
    }
    Ok(())
}
