//! Storage contracts: blob-style object stores (one per storage target) and
//! the shared metadata store, with in-memory backends and a retry decorator.

pub mod error;
pub mod fault;
pub mod memory;
pub mod memory_object;
pub mod metadata;
pub mod object;
pub mod retry;

pub use error::{ErrorContext, StoreError, StoreResult};
pub use fault::{Fault, FaultInjector};
pub use memory::InMemoryMetadataStore;
pub use memory_object::InMemoryObjectStore;
pub use metadata::{
    FailureRecord, HealthStatus, MetadataStore, ScanFileInformation, Severity, StationConfiguration,
};
pub use object::{ObjectInfo, ObjectLeaseState, ObjectPath, ObjectStore};
pub use retry::{RetryPolicy, RetryingMetadataStore, RetryingObjectStore};
