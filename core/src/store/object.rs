use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::error::{StoreError, StoreResult};

pub const SCAN_CONTAINER: &str = "scans";
pub const RAW_IQ_CONTAINER: &str = "rawiq";
pub const LOCK_CONTAINER: &str = "locks";
pub const LOG_CONTAINER: &str = "logs";

pub const STANDARD_CONTAINERS: [&str; 4] =
    [SCAN_CONTAINER, RAW_IQ_CONTAINER, LOCK_CONTAINER, LOG_CONTAINER];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectLeaseState {
    Available,
    Leased,
}

/// Listing entry and properties of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub container: String,
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub lease_state: ObjectLeaseState,
    /// Bumped on every write, metadata change and lease transition.
    pub version: u64,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectInfo {
    pub fn is_leased(&self) -> bool {
        self.lease_state == ObjectLeaseState::Leased
    }
}

/// `container/name` split of an object location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub container: String,
    pub name: String,
}

impl ObjectPath {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    pub fn parse(location: &str) -> StoreResult<Self> {
        let trimmed = location.trim_start_matches('/');
        match trimmed.split_once('/') {
            Some((container, name)) if !container.is_empty() && !name.is_empty() => {
                Ok(Self::new(container, name))
            }
            _ => Err(StoreError::validation(format!(
                "location {:?} is not of the form container/name",
                location
            ))),
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// One storage target's blob store.
///
/// Lease rules: a leased object rejects uploads, deletes and metadata writes
/// that do not present the active lease id; acquiring a lease another id holds
/// fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Name of the storage target this store talks to.
    fn target(&self) -> &str;

    async fn list_containers(&self) -> StoreResult<Vec<String>>;

    async fn exists(&self, container: &str, name: &str) -> StoreResult<bool>;

    /// With `overwrite == false` an existing object is a conflict.
    async fn upload(&self, container: &str, name: &str, data: Vec<u8>, overwrite: bool) -> StoreResult<()>;

    async fn download(&self, container: &str, name: &str) -> StoreResult<Vec<u8>>;

    async fn properties(&self, container: &str, name: &str) -> StoreResult<ObjectInfo>;

    async fn list(&self, container: &str) -> StoreResult<Vec<ObjectInfo>>;

    /// Returns whether an object was removed.
    async fn delete_if_exists(&self, container: &str, name: &str) -> StoreResult<bool>;

    /// Take the lease under `proposed_id`; `None` duration never expires.
    /// Re-acquiring with the id that already holds it succeeds.
    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        proposed_id: &str,
        duration: Option<Duration>,
    ) -> StoreResult<String>;

    async fn renew_lease(&self, container: &str, name: &str, lease_id: &str) -> StoreResult<()>;

    async fn release_lease(&self, container: &str, name: &str, lease_id: &str) -> StoreResult<()>;

    /// Drop whatever lease is active. With `if_version` the break only applies
    /// while the object is still at that version, else it is a conflict.
    async fn break_lease(&self, container: &str, name: &str, if_version: Option<u64>) -> StoreResult<()>;

    /// Replace the object's metadata, refreshing its last-modified time.
    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        lease_id: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_split_on_the_first_separator() {
        let path = ObjectPath::parse("scans/st-1/2024/05/file.bin").unwrap();
        assert_eq!(path.container, "scans");
        assert_eq!(path.name, "st-1/2024/05/file.bin");
        assert_eq!(path.to_string(), "scans/st-1/2024/05/file.bin");
        assert!(ObjectPath::parse("/rawiq/x").is_ok());
    }

    #[test]
    fn locations_without_a_name_are_rejected() {
        for bad in ["", "scans", "scans/", "/x"] {
            assert!(ObjectPath::parse(bad).is_err(), "{:?} parsed", bad);
        }
    }
}
