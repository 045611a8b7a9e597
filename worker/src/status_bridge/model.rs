use serde::Serialize;
use spectrumcore::store::{FailureRecord, HealthStatus};
use spectrumcore::telemetry::MetricsSnapshot;

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StatusModel {
    pub metrics: MetricsSnapshot,
    pub queue_depth: usize,
    pub stations: usize,
    pub failures: Vec<FailureRecord>,
    pub health: Vec<HealthStatus>,
}
