use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use log::{debug, warn};

use super::{relinquish, AcquireOutcome, LeaseConfig, LeaseLock, LeaseToken};
use crate::clock::Clock;
use crate::store::{ObjectStore, StoreResult};

const HOLDER_KEY: &str = "holder";
const HEARTBEAT_KEY: &str = "heartbeat";

/// [`LeaseLock`] over one storage target's lock container.
#[derive(Debug, Clone)]
pub struct ObjectLeaseLock {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
}

impl ObjectLeaseLock {
    pub fn new(store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>, config: LeaseConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    async fn ensure_lock_object(&self, name: &str) -> StoreResult<()> {
        match self
            .store
            .upload(&self.config.container, name, Vec::new(), false)
            .await
        {
            Ok(()) => {
                debug!("created lock object {}", name);
                Ok(())
            }
            Err(err) if err.is_conflict() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Break the current lease when its holder went quiet for longer than
    /// `max_lease_wait`. Returns whether this call did the break.
    async fn break_if_stale(&self, name: &str) -> StoreResult<bool> {
        let info = self.store.properties(&self.config.container, name).await?;
        if !info.is_leased() {
            return Ok(false);
        }
        let idle = self.clock.now() - info.last_modified;
        if idle <= self.config.max_lease_wait() {
            return Ok(false);
        }
        warn!(
            "lease {} held by {} has been idle for {}s, breaking it",
            name,
            info.metadata.get(HOLDER_KEY).map_or("unknown", String::as_str),
            idle.num_seconds()
        );
        // Conditional on the version we judged stale, so two workers breaking
        // at once cannot evict a holder that acquired in between.
        match self
            .store
            .break_lease(&self.config.container, name, Some(info.version))
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.is_conflict() => {
                debug!("stale lease {} changed hands before the break", name);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn heartbeat(&self, name: &str, lease_id: &str) -> StoreResult<()> {
        let metadata = BTreeMap::from([
            (HOLDER_KEY.to_string(), lease_id.to_string()),
            (HEARTBEAT_KEY.to_string(), self.clock.now().to_rfc3339()),
        ]);
        self.store
            .set_metadata(&self.config.container, name, Some(lease_id), metadata)
            .await
    }
}

#[async_trait]
impl LeaseLock for ObjectLeaseLock {
    fn config(&self) -> &LeaseConfig {
        &self.config
    }

    async fn try_acquire(
        &self,
        name: &str,
        proposed_id: &str,
        max_expiration: Option<Duration>,
    ) -> StoreResult<AcquireOutcome> {
        self.ensure_lock_object(name).await?;
        let broke_stale = match self.break_if_stale(name).await {
            Ok(broke) => broke,
            // The sweep removed the lock object between the two calls.
            Err(err) if err.is_not_found() => return Ok(AcquireOutcome::Contended),
            Err(err) => return Err(err),
        };

        let lease_id = match self
            .store
            .acquire_lease(&self.config.container, name, proposed_id, max_expiration)
            .await
        {
            Ok(id) => id,
            Err(err) if err.is_conflict() || err.is_not_found() => {
                return Ok(AcquireOutcome::Contended)
            }
            Err(err) => return Err(err),
        };

        let token = LeaseToken {
            name: name.to_string(),
            lease_id,
            acquired_at: self.clock.now(),
            broke_stale,
        };
        if let Err(err) = self.heartbeat(name, &token.lease_id).await {
            warn!("heartbeat on fresh lease {} failed, giving it up: {}", name, err);
            relinquish(self, &token).await;
            return Err(err);
        }
        Ok(AcquireOutcome::Held(token))
    }

    async fn renew(&self, token: &LeaseToken) -> StoreResult<()> {
        self.store
            .renew_lease(&self.config.container, &token.name, &token.lease_id)
            .await?;
        self.heartbeat(&token.name, &token.lease_id).await
    }

    async fn release(&self, token: &LeaseToken) -> StoreResult<()> {
        self.store
            .release_lease(&self.config.container, &token.name, &token.lease_id)
            .await
    }

    async fn break_lease(&self, name: &str) -> StoreResult<()> {
        self.store
            .break_lease(&self.config.container, name, None)
            .await
    }

    async fn discard(&self, name: &str) -> StoreResult<bool> {
        self.store
            .delete_if_exists(&self.config.container, name)
            .await
    }
}
