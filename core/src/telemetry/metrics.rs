use serde::Serialize;
use std::sync::Mutex;

/// Worker counters exported through the status bridge.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages handed to a handler.
    pub dispatched: usize,
    /// Messages that could not be decoded.
    pub dropped: usize,
    /// Dispatches that ended in an error.
    pub failed: usize,
    pub files_processed: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_dispatched(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.dispatched += 1;
        }
    }

    pub fn record_dropped(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.dropped += 1;
        }
    }

    pub fn record_failed(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.failed += 1;
        }
    }

    pub fn record_file_processed(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.files_processed += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .map(|metrics| *metrics)
            .unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MetricsRecorder").field(&self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = MetricsRecorder::new();
        metrics.record_dispatched();
        metrics.record_dispatched();
        metrics.record_dropped();
        metrics.record_file_processed();
        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                dispatched: 2,
                dropped: 1,
                failed: 0,
                files_processed: 1,
            }
        );
    }
}
