use std::sync::Arc;

use log::{error, info, warn};

use super::drift::{reconcile_configuration, ConfigurationChange};
use crate::capture::CaptureFile;
use crate::clock::Clock;
use crate::prelude::{CoreResult, Resolution};
use crate::rollup::{RuleContext, RuleExecution, RuleInput, RuleOutcome, RuleSet};
use crate::store::{FailureRecord, MetadataStore, ScanFileInformation};
use crate::telemetry::Monitor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingReport {
    pub configuration: Option<ConfigurationChange>,
    pub outcomes: Vec<(Resolution, RuleOutcome)>,
    pub failed_rules: Vec<Resolution>,
}

/// Turns one decoded capture into rollup updates for a single storage target.
pub struct ScanFileProcessor {
    storage_target: String,
    metadata: Arc<dyn MetadataStore>,
    monitor: Arc<dyn Monitor>,
    clock: Arc<dyn Clock>,
    rules: RuleSet,
    rule_context: RuleContext,
    execution: RuleExecution,
}

impl ScanFileProcessor {
    pub fn new(
        storage_target: impl Into<String>,
        rule_context: RuleContext,
        monitor: Arc<dyn Monitor>,
        rules: RuleSet,
        execution: RuleExecution,
    ) -> Self {
        Self {
            storage_target: storage_target.into(),
            metadata: rule_context.metadata.clone(),
            clock: rule_context.clock.clone(),
            monitor,
            rules,
            rule_context,
            execution,
        }
    }

    pub fn storage_target(&self) -> &str {
        &self.storage_target
    }

    /// Reconcile configuration, run every rule and record the file.
    ///
    /// Rule and configuration errors become failure records and do not stop
    /// the file; only failing to record the file itself is returned.
    pub async fn process(
        &self,
        capture: CaptureFile,
        station_id: &str,
        location: &str,
    ) -> CoreResult<ProcessingReport> {
        if capture.config.station_id != station_id {
            warn!(
                "{} claims station {} but was queued for {}",
                location, capture.config.station_id, station_id
            );
        }

        let configuration = match reconcile_configuration(
            self.metadata.as_ref(),
            self.monitor.as_ref(),
            station_id,
            &capture.config,
            &self.storage_target,
        )
        .await
        {
            Ok(change) => Some(change),
            Err(err) => {
                self.record_failure(station_id, location, format!("configuration update: {}", err))
                    .await;
                None
            }
        };

        let info = ScanFileInformation {
            station_id: station_id.to_string(),
            time_start: capture.config.timestamp,
            compression: capture.compression,
            file_kind: capture.kind,
            location: location.to_string(),
            start_frequency_hz: capture.frequency_span().map_or(0, |b| b.start_hz),
            stop_frequency_hz: capture.frequency_span().map_or(0, |b| b.stop_hz),
        };

        let input = Arc::new(RuleInput {
            station_id: station_id.to_string(),
            source_id: location.to_string(),
            blocks: capture.blocks,
        });
        let mut outcomes = Vec::new();
        let mut failed_rules = Vec::new();
        for (resolution, result) in self.rules.run(input, &self.rule_context, self.execution).await {
            match result {
                Ok(outcome) => outcomes.push((resolution, outcome)),
                Err(err) => {
                    error!(
                        "{} rollup failed for station {} file {}: {}",
                        resolution, station_id, location, err
                    );
                    self.record_failure(station_id, location, format!("{} rollup: {}", resolution, err))
                        .await;
                    failed_rules.push(resolution);
                }
            }
        }

        self.metadata.upsert_scan_file(info).await?;
        info!(
            "processed {} for station {}: {} rules ok, {} failed",
            location,
            station_id,
            outcomes.len(),
            failed_rules.len()
        );
        Ok(ProcessingReport {
            configuration,
            outcomes,
            failed_rules,
        })
    }

    async fn record_failure(&self, station_id: &str, location: &str, message: String) {
        self.monitor
            .record_processing_failure(FailureRecord {
                station_id: station_id.to_string(),
                location: location.to_string(),
                message,
                time: self.clock.now(),
            })
            .await;
    }
}
