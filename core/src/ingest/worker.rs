use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::jobs::{check_station_availability, refresh_shared_access};
use super::message::WorkerMessage;
use super::queue::MessageQueue;
use crate::capture::{decoder_for, FileKind};
use crate::context::IngestContext;
use crate::lease::ObjectLeaseLock;
use crate::prelude::CoreResult;
use crate::processing::ScanFileProcessor;
use crate::retention;
use crate::rollup::{RuleContext, RuleSet};
use crate::store::{FailureRecord, ObjectPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue was empty.
    Idle,
    Dispatched,
    /// The message could not be decoded and was discarded.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub dispatched: usize,
    pub dropped: usize,
}

/// Queue consumer. Any number of instances, in one process or many, may share
/// a queue; coordination happens only through the lease lock.
#[derive(Clone)]
pub struct IngestionWorker {
    name: String,
    ctx: Arc<IngestContext>,
    queue: Arc<dyn MessageQueue>,
    rules: RuleSet,
    processors: Arc<Mutex<HashMap<String, Arc<ScanFileProcessor>>>>,
}

impl IngestionWorker {
    pub fn new(name: impl Into<String>, ctx: Arc<IngestContext>, queue: Arc<dyn MessageQueue>) -> Self {
        Self::with_rules(name, ctx, queue, RuleSet::standard())
    }

    pub fn with_rules(
        name: impl Into<String>,
        ctx: Arc<IngestContext>,
        queue: Arc<dyn MessageQueue>,
        rules: RuleSet,
    ) -> Self {
        Self {
            name: name.into(),
            ctx,
            queue,
            rules,
            processors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<IngestContext> {
        &self.ctx
    }

    /// Consume until `cancel` fires. Cancellation is observed between
    /// messages; a message being handled always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("worker {} started", self.name);
        let idle = self.ctx.settings.poll_interval;
        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(PollOutcome::Idle) => {}
                Ok(_) => continue,
                Err(err) => warn!("worker {} could not poll the queue: {}", self.name, err),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }
        info!("worker {} stopped", self.name);
    }

    /// Handle messages until the queue reports empty.
    pub async fn drain(&self) -> CoreResult<DrainSummary> {
        let mut summary = DrainSummary::default();
        loop {
            match self.poll_once().await? {
                PollOutcome::Idle => return Ok(summary),
                PollOutcome::Dispatched => summary.dispatched += 1,
                PollOutcome::Dropped => summary.dropped += 1,
            }
        }
    }

    /// Take one message, handle it and delete it. Handler errors and panics
    /// are logged and counted; only a failing queue is returned.
    pub async fn poll_once(&self) -> CoreResult<PollOutcome> {
        let Some(message) = self.queue.pop().await? else {
            return Ok(PollOutcome::Idle);
        };

        let outcome = match WorkerMessage::decode(&message.body) {
            Err(err) => {
                warn!(
                    "worker {} dropping message {}: {} (payload {:?})",
                    self.name, message.id, err, message.body
                );
                self.ctx.metrics.record_dropped();
                PollOutcome::Dropped
            }
            Ok(decoded) => {
                self.ctx.metrics.record_dispatched();
                let kind = decoded.kind();
                debug!("worker {} handling {} (attempt {})", self.name, kind, message.dequeue_count);
                let worker = self.clone();
                match tokio::spawn(async move { worker.dispatch(decoded).await }).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!("worker {} failed {}: {}", self.name, kind, err);
                        self.ctx.metrics.record_failed();
                    }
                    Err(join) => {
                        error!("worker {} handler for {} aborted: {}", self.name, kind, join);
                        self.ctx.metrics.record_failed();
                    }
                }
                PollOutcome::Dispatched
            }
        };

        if let Err(err) = self.queue.delete(&message).await {
            warn!("worker {} could not delete message {}: {}", self.name, message.id, err);
        }
        Ok(outcome)
    }

    async fn dispatch(&self, message: WorkerMessage) -> CoreResult<()> {
        match message {
            WorkerMessage::FileProcessing {
                station_id,
                location,
                upload_succeeded,
            } => {
                let result = self.process_file(&station_id, &location, upload_succeeded).await;
                if let Err(err) = &result {
                    self.ctx
                        .monitor
                        .record_processing_failure(FailureRecord {
                            station_id,
                            location,
                            message: err.to_string(),
                            time: self.ctx.clock.now(),
                        })
                        .await;
                }
                result
            }
            WorkerMessage::RetentionSweep => {
                let report = retention::sweep(&self.ctx).await;
                info!("worker {} retention sweep: {}", self.name, report);
                Ok(())
            }
            WorkerMessage::HealthMonitoringCheck => self.ctx.health.run(&self.ctx).await.map(|_| ()),
            WorkerMessage::SharedAccessRefresh => {
                refresh_shared_access(&self.ctx).await;
                Ok(())
            }
            WorkerMessage::StationAvailabilityCheck => {
                check_station_availability(&self.ctx).await.map(|_| ())
            }
        }
    }

    async fn process_file(&self, station_id: &str, location: &str, upload_succeeded: bool) -> CoreResult<()> {
        let store = self.ctx.target_for_station(station_id)?;
        let path = ObjectPath::parse(location)?;

        if !upload_succeeded {
            let removed = store.delete_if_exists(&path.container, &path.name).await?;
            info!(
                "upload of {} for station {} failed, orphan removed: {}",
                path, station_id, removed
            );
            return Ok(());
        }

        let kind = FileKind::from_container(&path.container)?;
        let bytes = store.download(&path.container, &path.name).await?;
        let capture = decoder_for(kind).decode(&bytes)?;

        let processor = self.processor_for(store.target()).await?;
        processor.process(capture, station_id, location).await?;
        self.ctx.metrics.record_file_processed();
        Ok(())
    }

    async fn processor_for(&self, target: &str) -> CoreResult<Arc<ScanFileProcessor>> {
        let mut processors = self.processors.lock().await;
        if let Some(processor) = processors.get(target) {
            return Ok(processor.clone());
        }

        let store = self.ctx.target(target)?;
        let rule_context = RuleContext {
            metadata: self.ctx.metadata.clone(),
            lock: Arc::new(ObjectLeaseLock::new(
                store,
                self.ctx.clock.clone(),
                self.ctx.settings.lease.clone(),
            )),
            clock: self.ctx.clock.clone(),
            grid: self.ctx.settings.grid,
        };
        let processor = Arc::new(ScanFileProcessor::new(
            target,
            rule_context,
            self.ctx.monitor.clone(),
            self.rules.clone(),
            self.ctx.settings.execution,
        ));
        processors.insert(target.to_string(), processor.clone());
        debug!("worker {} built processor for {}", self.name, target);
        Ok(processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::format::MAX_FREQUENCY_HZ;
    use crate::capture::{
        CaptureFile, CaptureWriter, CompressionType, ConfigBlock, SpectralDataBlock, SpectralSegment,
    };
    use crate::clock::ManualClock;
    use crate::context::IngestSettings;
    use crate::ingest::queue::InMemoryQueue;
    use crate::math::FixedShort;
    use crate::store::{InMemoryMetadataStore, InMemoryObjectStore, MetadataStore, ObjectStore, RetryPolicy};
    use chrono::{TimeZone, Utc};
    use std::time::Duration as StdDuration;

    struct Fixture {
        worker: IngestionWorker,
        queue: Arc<InMemoryQueue>,
        metadata: Arc<InMemoryMetadataStore>,
        objects: Arc<InMemoryObjectStore>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap()));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let objects = Arc::new(InMemoryObjectStore::new("west", clock.clone()));
        let queue = Arc::new(InMemoryQueue::new(clock.clone()));
        let settings = IngestSettings {
            retry: RetryPolicy::none(),
            poll_interval: StdDuration::from_millis(10),
            ..IngestSettings::default()
        };
        let ctx = IngestContext::builder(metadata.clone(), clock)
            .target(objects.clone())
            .station("st", "west")
            .settings(settings)
            .build()
            .unwrap();
        Fixture {
            worker: IngestionWorker::new("w0", ctx, queue.clone()),
            queue,
            metadata,
            objects,
        }
    }

    fn scan_bytes() -> Vec<u8> {
        scan_with(vec![SpectralSegment {
            start_frequency_hz: 100_000_000,
            step_hz: 100_000,
            readings: vec![FixedShort::from_db(-90.0); 8],
        }])
    }

    fn scan_with(segments: Vec<SpectralSegment>) -> Vec<u8> {
        let at = Utc.with_ymd_and_hms(2024, 4, 2, 8, 30, 0).unwrap();
        let capture = CaptureFile {
            config: ConfigBlock {
                station_id: "st".into(),
                timestamp: at,
                config_modified: at,
                hardware_info: "rev-a".into(),
                sensors: Vec::new(),
            },
            kind: FileKind::Scan,
            compression: CompressionType::None,
            blocks: vec![SpectralDataBlock { timestamp: at, segments }],
            iq_band: None,
        };
        CaptureWriter::encode(&capture).unwrap()
    }

    fn file_message(location: &str, upload_succeeded: bool) -> String {
        WorkerMessage::FileProcessing {
            station_id: "st".into(),
            location: location.into(),
            upload_succeeded,
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn scan_files_are_processed_and_deleted_from_the_queue() {
        let f = fixture();
        f.objects.upload("scans", "st/one.bin", scan_bytes(), false).await.unwrap();
        f.queue.push(file_message("scans/st/one.bin", true)).await.unwrap();

        assert_eq!(f.worker.poll_once().await.unwrap(), PollOutcome::Dispatched);
        assert_eq!(f.queue.len().await.unwrap(), 0);
        assert_eq!(f.metadata.scan_files("st").await.unwrap().len(), 1);
        assert_eq!(f.worker.context().metrics.snapshot().files_processed, 1);
    }

    #[tokio::test]
    async fn failed_uploads_remove_the_orphan() {
        let f = fixture();
        f.objects.upload("scans", "st/partial.bin", vec![1, 2, 3], false).await.unwrap();
        f.queue.push(file_message("scans/st/partial.bin", false)).await.unwrap();

        f.worker.drain().await.unwrap();
        assert!(!f.objects.exists("scans", "st/partial.bin").await.unwrap());
        assert!(f.metadata.scan_files("st").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_files_become_failure_records() {
        let f = fixture();
        f.objects.upload("scans", "st/bad.bin", b"garbage".to_vec(), false).await.unwrap();
        f.queue.push(file_message("scans/st/bad.bin", true)).await.unwrap();

        let summary = f.worker.drain().await.unwrap();
        assert_eq!(summary.dispatched, 1);
        let failures = f.metadata.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].location, "scans/st/bad.bin");
        assert_eq!(f.worker.context().metrics.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn out_of_range_frequencies_fail_the_file_not_the_worker() {
        let f = fixture();
        let single = |hz| SpectralSegment {
            start_frequency_hz: hz,
            step_hz: 0,
            readings: vec![FixedShort::from_db(-70.0)],
        };
        let wide = scan_with(vec![single(0), single(1_000_000_000_000_000_000)]);
        f.objects.upload("scans", "st/wide.bin", wide, false).await.unwrap();
        // Bottom and top of the accepted range: two tiles, nothing in between.
        let edges = scan_with(vec![single(0), single(MAX_FREQUENCY_HZ)]);
        f.objects.upload("scans", "st/edges.bin", edges, false).await.unwrap();
        f.queue.push(file_message("scans/st/wide.bin", true)).await.unwrap();
        f.queue.push(file_message("scans/st/edges.bin", true)).await.unwrap();

        let summary = f.worker.drain().await.unwrap();
        assert_eq!(summary.dispatched, 2);
        assert_eq!(f.queue.len().await.unwrap(), 0);
        let failures = f.metadata.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].location, "scans/st/wide.bin");
        assert_eq!(f.worker.context().metrics.snapshot().files_processed, 1);
    }

    #[tokio::test]
    async fn undecodable_messages_are_dropped() {
        let f = fixture();
        f.queue.push("{\"kind\":\"nope\"}".into()).await.unwrap();
        f.queue.push(WorkerMessage::SharedAccessRefresh.encode().unwrap()).await.unwrap();

        let summary = f.worker.drain().await.unwrap();
        assert_eq!(summary, DrainSummary { dispatched: 1, dropped: 1 });
        assert_eq!(f.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let handle = {
            let worker = f.worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };
        f.queue.push(WorkerMessage::SharedAccessRefresh.encode().unwrap()).await.unwrap();
        while f.queue.len().await.unwrap() > 0 {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(f.worker.context().metrics.snapshot().dispatched, 1);
    }
}
