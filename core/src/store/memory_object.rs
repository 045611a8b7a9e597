//! In-memory [`ObjectStore`] with lease semantics, for tests and offline runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::error::{StoreError, StoreResult};
use super::fault::{Fault, FaultInjector};
use super::object::{ObjectInfo, ObjectLeaseState, ObjectStore, STANDARD_CONTAINERS};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct ActiveLease {
    id: String,
    duration: Option<Duration>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    version: u64,
    metadata: BTreeMap<String, String>,
    lease: Option<ActiveLease>,
}

impl StoredObject {
    fn active_lease(&self, now: DateTime<Utc>) -> Option<&ActiveLease> {
        self.lease
            .as_ref()
            .filter(|lease| lease.expires_at.map_or(true, |at| at > now))
    }

    fn ensure_unleased_or(&self, lease_id: Option<&str>, now: DateTime<Utc>) -> StoreResult<()> {
        match (self.active_lease(now), lease_id) {
            (None, None) => Ok(()),
            (Some(active), Some(id)) if active.id == id => Ok(()),
            (Some(_), _) => Err(StoreError::conflict("object is leased")),
            (None, Some(_)) => Err(StoreError::conflict("object has no active lease")),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryObjectStore {
    target: String,
    clock: Arc<dyn Clock>,
    containers: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    faults: FaultInjector,
}

impl InMemoryObjectStore {
    /// Empty store with the standard containers already created.
    pub fn new(target: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let containers = STANDARD_CONTAINERS
            .iter()
            .map(|c| (c.to_string(), BTreeMap::new()))
            .collect();
        Self {
            target: target.into(),
            clock,
            containers: Mutex::new(containers),
            faults: FaultInjector::default(),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.inject(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn object_count(&self, container: &str) -> usize {
        self.containers.lock().get(container).map_or(0, BTreeMap::len)
    }

    fn check(&self, operation: &str, container: &str, name: &str) -> StoreResult<()> {
        self.faults
            .check(operation, &format!("{}/{}", container, name))
            .map_err(|e| e.with_target(self.target.as_str()))
    }

    fn with_object<T>(
        &self,
        operation: &'static str,
        container: &str,
        name: &str,
        f: impl FnOnce(&mut StoredObject, DateTime<Utc>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.check(operation, container, name)?;
        let now = self.clock.now();
        let mut containers = self.containers.lock();
        let object = containers
            .get_mut(container)
            .and_then(|objects| objects.get_mut(name))
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", container, name)))
            .map_err(|e| self.decorate(e, operation, container, name))?;
        f(object, now).map_err(|e| self.decorate(e, operation, container, name))
    }

    fn decorate(&self, error: StoreError, operation: &str, container: &str, name: &str) -> StoreError {
        error
            .with_operation(operation)
            .with_target(self.target.as_str())
            .with_entity(format!("{}/{}", container, name))
    }

    fn info(container: &str, name: &str, object: &StoredObject, now: DateTime<Utc>) -> ObjectInfo {
        ObjectInfo {
            container: container.to_string(),
            name: name.to_string(),
            size: object.data.len() as u64,
            last_modified: object.last_modified,
            lease_state: if object.active_lease(now).is_some() {
                ObjectLeaseState::Leased
            } else {
                ObjectLeaseState::Available
            },
            version: object.version,
            metadata: object.metadata.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn target(&self) -> &str {
        &self.target
    }

    async fn list_containers(&self) -> StoreResult<Vec<String>> {
        self.check("list_containers", "", "")?;
        Ok(self.containers.lock().keys().cloned().collect())
    }

    async fn exists(&self, container: &str, name: &str) -> StoreResult<bool> {
        self.check("exists", container, name)?;
        Ok(self
            .containers
            .lock()
            .get(container)
            .map_or(false, |objects| objects.contains_key(name)))
    }

    async fn upload(&self, container: &str, name: &str, data: Vec<u8>, overwrite: bool) -> StoreResult<()> {
        self.check("upload", container, name)?;
        let now = self.clock.now();
        let mut containers = self.containers.lock();
        let objects = containers.entry(container.to_string()).or_default();
        if let Some(existing) = objects.get_mut(name) {
            if !overwrite {
                return Err(self.decorate(
                    StoreError::conflict("object already exists"),
                    "upload",
                    container,
                    name,
                ));
            }
            existing
                .ensure_unleased_or(None, now)
                .map_err(|e| self.decorate(e, "upload", container, name))?;
            existing.data = data;
            existing.last_modified = now;
            existing.version += 1;
            return Ok(());
        }
        objects.insert(
            name.to_string(),
            StoredObject {
                data,
                last_modified: now,
                version: 1,
                metadata: BTreeMap::new(),
                lease: None,
            },
        );
        Ok(())
    }

    async fn download(&self, container: &str, name: &str) -> StoreResult<Vec<u8>> {
        self.with_object("download", container, name, |object, _| Ok(object.data.clone()))
    }

    async fn properties(&self, container: &str, name: &str) -> StoreResult<ObjectInfo> {
        self.with_object("properties", container, name, |object, now| {
            Ok(Self::info(container, name, object, now))
        })
    }

    async fn list(&self, container: &str) -> StoreResult<Vec<ObjectInfo>> {
        self.check("list", container, "")?;
        let now = self.clock.now();
        let containers = self.containers.lock();
        let objects = containers.get(container).ok_or_else(|| {
            self.decorate(StoreError::not_found("no such container"), "list", container, "")
        })?;
        Ok(objects
            .iter()
            .map(|(name, object)| Self::info(container, name, object, now))
            .collect())
    }

    async fn delete_if_exists(&self, container: &str, name: &str) -> StoreResult<bool> {
        self.check("delete", container, name)?;
        let now = self.clock.now();
        let mut containers = self.containers.lock();
        let Some(objects) = containers.get_mut(container) else {
            return Ok(false);
        };
        let Some(object) = objects.get(name) else {
            return Ok(false);
        };
        object
            .ensure_unleased_or(None, now)
            .map_err(|e| self.decorate(e, "delete", container, name))?;
        objects.remove(name);
        Ok(true)
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        proposed_id: &str,
        duration: Option<Duration>,
    ) -> StoreResult<String> {
        self.with_object("acquire_lease", container, name, |object, now| {
            if let Some(active) = object.active_lease(now) {
                if active.id != proposed_id {
                    return Err(StoreError::conflict("lease held by another owner"));
                }
            }
            object.lease = Some(ActiveLease {
                id: proposed_id.to_string(),
                duration,
                expires_at: duration.map(|d| now + d),
            });
            object.version += 1;
            Ok(proposed_id.to_string())
        })
    }

    async fn renew_lease(&self, container: &str, name: &str, lease_id: &str) -> StoreResult<()> {
        self.with_object("renew_lease", container, name, |object, now| {
            let lease = object
                .lease
                .as_mut()
                .filter(|lease| lease.id == lease_id)
                .ok_or_else(|| StoreError::conflict("lease id does not match"))?;
            // An expired lease can still be renewed as long as nobody took it over.
            lease.expires_at = lease.duration.map(|d| now + d);
            Ok(())
        })
    }

    async fn release_lease(&self, container: &str, name: &str, lease_id: &str) -> StoreResult<()> {
        self.with_object("release_lease", container, name, |object, now| {
            match object.active_lease(now) {
                Some(active) if active.id == lease_id => {
                    object.lease = None;
                    object.version += 1;
                    Ok(())
                }
                _ => Err(StoreError::conflict("lease id does not match")),
            }
        })
    }

    async fn break_lease(&self, container: &str, name: &str, if_version: Option<u64>) -> StoreResult<()> {
        self.with_object("break_lease", container, name, |object, _| {
            if let Some(expected) = if_version {
                if object.version != expected {
                    return Err(StoreError::conflict(format!(
                        "object moved to version {} (expected {})",
                        object.version, expected
                    )));
                }
            }
            object.lease = None;
            object.version += 1;
            Ok(())
        })
    }

    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        lease_id: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<()> {
        self.with_object("set_metadata", container, name, |object, now| {
            object.ensure_unleased_or(lease_id, now)?;
            object.metadata = metadata;
            object.last_modified = now;
            object.version += 1;
            Ok(())
        })
    }
}
