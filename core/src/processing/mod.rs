pub mod drift;
pub mod scan_file;
pub mod station;

pub use drift::{reconcile_configuration, ConfigurationChange};
pub use scan_file::{ProcessingReport, ScanFileProcessor};
pub use station::{StationEntry, StationRegistry};
