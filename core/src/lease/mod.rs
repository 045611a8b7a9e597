//! Mutual exclusion across worker instances, built on object-store leases.
//!
//! A lock is a zero-byte object in the lock container. Holding the lock means
//! holding that object's lease. Holders refresh the object's last-modified time
//! when they acquire or renew, so a lease nobody touched for longer than
//! `max_lease_wait` is treated as abandoned and broken.

mod blocking;
mod object;

use std::future::Future;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::prelude::CoreResult;
use crate::store::object::LOCK_CONTAINER;
use crate::store::StoreResult;

pub use blocking::BlockingLeaseLock;
pub use object::ObjectLeaseLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_lease_wait_secs: i64,
    pub container: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 128_000,
            max_lease_wait_secs: 3_600,
            container: LOCK_CONTAINER.to_string(),
        }
    }
}

impl LeaseConfig {
    /// Sleep after the `attempt`-th contended try (0-indexed): doubles from
    /// `initial_backoff_ms` and stays at `max_backoff_ms` once reached.
    pub fn backoff_delay(&self, attempt: u32) -> StdDuration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        StdDuration::from_millis(delay.min(self.max_backoff_ms))
    }

    pub fn max_lease_wait(&self) -> Duration {
        Duration::seconds(self.max_lease_wait_secs)
    }
}

/// Proof of a held lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub name: String,
    pub lease_id: String,
    pub acquired_at: DateTime<Utc>,
    /// The previous holder's lease was broken as stale on the way in.
    pub broke_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Held(LeaseToken),
    Contended,
}

#[async_trait]
pub trait LeaseLock: Send + Sync {
    fn config(&self) -> &LeaseConfig;

    /// One attempt: create the lock object if needed, break a stale lease,
    /// then try to take the lease.
    async fn try_acquire(
        &self,
        name: &str,
        proposed_id: &str,
        max_expiration: Option<Duration>,
    ) -> StoreResult<AcquireOutcome>;

    /// Retry [`LeaseLock::try_acquire`] with exponential backoff until the lease
    /// is held. Only storage errors end the wait.
    async fn acquire_with_retry(
        &self,
        name: &str,
        proposed_id: &str,
        max_expiration: Option<Duration>,
    ) -> StoreResult<LeaseToken> {
        let mut attempt = 0u32;
        loop {
            match self.try_acquire(name, proposed_id, max_expiration).await? {
                AcquireOutcome::Held(token) => return Ok(token),
                AcquireOutcome::Contended => {
                    let delay = self.config().backoff_delay(attempt);
                    debug!("lease {} is held elsewhere, retrying in {:?}", name, delay);
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Extend the lease and refresh the heartbeat.
    async fn renew(&self, token: &LeaseToken) -> StoreResult<()>;

    async fn release(&self, token: &LeaseToken) -> StoreResult<()>;

    /// Drop whatever lease is active on `name`.
    async fn break_lease(&self, name: &str) -> StoreResult<()>;

    /// Delete the lock object; returns whether it existed.
    async fn discard(&self, name: &str) -> StoreResult<bool>;
}

/// Run `section` while holding the lease on `name`.
///
/// The lease is released afterwards whatever the section returned. When the
/// release itself fails the lease is broken, and when that fails too the lock
/// object is deleted, so a crashed section never strands the bucket behind a
/// lease until it goes stale.
pub async fn with_lock<L, T, F, Fut>(
    lock: &L,
    name: &str,
    proposed_id: &str,
    max_expiration: Option<Duration>,
    section: F,
) -> CoreResult<T>
where
    L: LeaseLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let token = lock
        .acquire_with_retry(name, proposed_id, max_expiration)
        .await?;
    let result = section().await;
    if let Err(err) = &result {
        debug!("critical section under lease {} failed: {}", name, err);
    }
    relinquish(lock, &token).await;
    result
}

async fn relinquish<L: LeaseLock + ?Sized>(lock: &L, token: &LeaseToken) {
    let released = match lock.release(token).await {
        Ok(()) => return,
        Err(err) => err,
    };
    warn!("releasing lease {} failed, breaking it: {}", token.name, released);
    let broken = match lock.break_lease(&token.name).await {
        Ok(()) => return,
        Err(err) => err,
    };
    warn!("breaking lease {} failed, deleting the lock: {}", token.name, broken);
    if let Err(err) = lock.discard(&token.name).await {
        error!("lease {} could not be cleaned up: {}", token.name, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let config = LeaseConfig::default();
        let secs: Vec<u64> = (0..10).map(|a| config.backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 64, 128, 128, 128]);
        assert_eq!(config.backoff_delay(u32::MAX).as_secs(), 128);
    }
}
