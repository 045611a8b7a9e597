pub mod metrics;
pub mod monitor;

pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use monitor::{Monitor, StoreMonitor};
