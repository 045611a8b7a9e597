use crate::generator::capture::{CaptureGenerator, GeneratorConfig};
use crate::workflow::config::WorkerConfig;
use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use log::{info, warn};
use spectrumcore::capture::FileKind;
use spectrumcore::clock::{Clock, SystemClock};
use spectrumcore::ingest::{DrainSummary, InMemoryQueue, MessageQueue};
use spectrumcore::store::{InMemoryMetadataStore, InMemoryObjectStore, ObjectStore};
use spectrumcore::{IngestContext, IngestionWorker, WorkerMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// In-process deployment: shared queue, in-memory backends and N workers.
#[derive(Clone)]
pub struct Runner {
    config: WorkerConfig,
    ctx: Arc<IngestContext>,
    queue: Arc<InMemoryQueue>,
    objects: BTreeMap<String, Arc<InMemoryObjectStore>>,
}

impl Runner {
    pub fn new(config: WorkerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let queue = Arc::new(InMemoryQueue::with_visibility_timeout(
            clock.clone(),
            ChronoDuration::seconds(config.worker.queue_visibility_secs),
        ));

        let objects: BTreeMap<String, Arc<InMemoryObjectStore>> = config
            .storage_targets()
            .into_iter()
            .map(|target| {
                let store = Arc::new(InMemoryObjectStore::new(target.clone(), clock.clone()));
                (target, store)
            })
            .collect();

        let mut builder = IngestContext::builder(metadata, clock).settings(config.to_settings()?);
        for store in objects.values() {
            builder = builder.target(store.clone());
        }
        for station in &config.stations {
            builder = builder.station(station.station_id.clone(), station.storage_target.clone());
        }
        let ctx = builder.build().context("building ingest context")?;

        Ok(Self {
            config,
            ctx,
            queue,
            objects,
        })
    }

    pub fn context(&self) -> &Arc<IngestContext> {
        &self.ctx
    }

    pub fn queue(&self) -> Arc<dyn MessageQueue> {
        self.queue.clone()
    }

    /// Upload `files` synthetic scans per station, one minute apart, and
    /// announce each on the queue. Returns the number queued.
    pub async fn seed_synthetic(&self, files: usize, generator: GeneratorConfig) -> anyhow::Result<usize> {
        let mut source = CaptureGenerator::new(generator);
        let start = Utc::now() - ChronoDuration::minutes(files as i64);
        let mut queued = 0;
        for station in &self.config.stations {
            let store = self
                .objects
                .get(&station.storage_target)
                .with_context(|| format!("no storage target {}", station.storage_target))?;
            for index in 0..files {
                let timestamp = start + ChronoDuration::minutes(index as i64);
                let name = format!("{}/{}.scan", station.station_id, timestamp.format("%Y%m%dT%H%M%S"));
                let bytes = source.scan_bytes(&station.station_id, timestamp)?;
                let container = FileKind::Scan.container();
                store
                    .upload(container, &name, bytes, true)
                    .await
                    .with_context(|| format!("uploading {}/{}", container, name))?;
                self.enqueue(&WorkerMessage::FileProcessing {
                    station_id: station.station_id.clone(),
                    location: format!("{}/{}", container, name),
                    upload_succeeded: true,
                })
                .await?;
                queued += 1;
            }
        }
        info!("queued {} synthetic captures", queued);
        Ok(queued)
    }

    pub async fn enqueue(&self, message: &WorkerMessage) -> anyhow::Result<()> {
        let body = message.encode().context("encoding queue message")?;
        self.queue.push(body).await.context("pushing queue message")?;
        Ok(())
    }

    fn worker(&self, index: usize) -> IngestionWorker {
        IngestionWorker::new(format!("worker-{}", index), self.ctx.clone(), self.queue.clone())
    }

    /// Process the queue to empty with every configured instance.
    pub async fn drain(&self) -> anyhow::Result<DrainSummary> {
        let handles: Vec<JoinHandle<_>> = (0..self.config.worker.instances)
            .map(|index| {
                let worker = self.worker(index);
                tokio::spawn(async move { worker.drain().await })
            })
            .collect();

        let mut total = DrainSummary::default();
        for handle in handles {
            let summary = handle.await.context("joining worker")??;
            total.dispatched += summary.dispatched;
            total.dropped += summary.dropped;
        }
        Ok(total)
    }

    /// Start the workers and the job timers; all stop when `cancel` fires.
    pub fn spawn(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = (0..self.config.worker.instances)
            .map(|index| {
                let worker = self.worker(index);
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();

        let section = &self.config.worker;
        let timers = [
            (section.health_check_interval_secs, WorkerMessage::HealthMonitoringCheck),
            (section.availability_interval_secs, WorkerMessage::StationAvailabilityCheck),
            (section.access_refresh_interval_secs, WorkerMessage::SharedAccessRefresh),
            (section.retention_interval_secs, WorkerMessage::RetentionSweep),
        ];
        for (secs, message) in timers {
            if secs == 0 {
                continue;
            }
            handles.push(tokio::spawn(self.clone().schedule(
                Duration::from_secs(secs),
                message,
                cancel.clone(),
            )));
        }
        handles
    }

    async fn schedule(self, period: Duration, message: WorkerMessage, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.enqueue(&message).await {
                warn!("could not schedule {}: {:#}", message.kind(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectrumcore::rollup::{BucketKey, RollupBucket};
    use spectrumcore::Resolution;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runner_drains_synthetic_captures() {
        let mut cfg = WorkerConfig::default();
        cfg.worker.instances = 2;
        let runner = Runner::new(cfg).unwrap();

        let generator = GeneratorConfig {
            blocks_per_file: 1,
            points: 16,
            ..GeneratorConfig::default()
        };
        assert_eq!(runner.seed_synthetic(3, generator).await.unwrap(), 3);
        let summary = runner.drain().await.unwrap();
        assert_eq!(summary.dispatched, 3);
        assert_eq!(runner.context().metrics.snapshot().files_processed, 3);

        let ctx = runner.context();
        let stored = ctx
            .metadata
            .rollup_buckets("demo-1", Resolution::Monthly)
            .await
            .unwrap();
        assert!(!stored.is_empty());
        let key: &BucketKey = &stored[0];
        let bucket = RollupBucket::load(ctx.metadata.as_ref(), key, ctx.settings.grid)
            .await
            .unwrap()
            .unwrap();
        assert!(bucket.count_at(88_000_000) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_enqueue_singleton_jobs() {
        let mut cfg = WorkerConfig::default();
        cfg.worker.health_check_interval_secs = 10;
        cfg.worker.availability_interval_secs = 0;
        cfg.worker.access_refresh_interval_secs = 0;
        cfg.worker.retention_interval_secs = 0;
        cfg.worker.instances = 1;
        let runner = Runner::new(cfg).unwrap();

        let cancel = CancellationToken::new();
        let queue = runner.queue();
        let timer = tokio::spawn(runner.clone().schedule(
            Duration::from_secs(10),
            WorkerMessage::HealthMonitoringCheck,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        timer.await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }
}
