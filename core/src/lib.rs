//! Ingestion core for multi-station spectrum monitoring.
//!
//! Stations upload scan captures to their storage target and announce them on
//! a shared queue. Workers decode each capture and fold it into raw, hourly,
//! daily, weekly and monthly min/max/average rollups, serialising updates to a
//! bucket through a lease lock held on the storage target.

pub mod capture;
pub mod clock;
pub mod context;
pub mod ingest;
pub mod lease;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod retention;
pub mod rollup;
pub mod store;
pub mod telemetry;

pub use context::{IngestContext, IngestSettings};
pub use ingest::{IngestionWorker, WorkerMessage};
pub use prelude::{CoreError, CoreResult, ReadingKind, Resolution};
