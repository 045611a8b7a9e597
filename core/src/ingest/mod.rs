//! Queue-driven worker: message envelopes, the shared queue and the jobs the
//! messages trigger.

pub mod jobs;
pub mod message;
pub mod queue;
pub mod worker;

pub use jobs::{check_station_availability, refresh_shared_access, HealthMonitor, HealthReport};
pub use message::{MessageError, WorkerMessage};
pub use queue::{InMemoryQueue, MessageQueue, QueueMessage};
pub use worker::{DrainSummary, IngestionWorker, PollOutcome};
