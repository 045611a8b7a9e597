use chrono::Duration;
use tokio::runtime::{Builder, Runtime};

use super::{AcquireOutcome, LeaseLock, LeaseToken};
use crate::store::StoreResult;

/// Synchronous facade over a [`LeaseLock`] for callers without a runtime.
///
/// Drives the async lock on a private current-thread runtime, so both variants
/// go through the same acquisition path. Must not be used from inside another
/// tokio runtime.
pub struct BlockingLeaseLock<L> {
    inner: L,
    runtime: Runtime,
}

impl<L: LeaseLock> BlockingLeaseLock<L> {
    pub fn new(inner: L) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self { inner, runtime })
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn try_acquire(
        &self,
        name: &str,
        proposed_id: &str,
        max_expiration: Option<Duration>,
    ) -> StoreResult<AcquireOutcome> {
        self.runtime
            .block_on(self.inner.try_acquire(name, proposed_id, max_expiration))
    }

    pub fn acquire_with_retry(
        &self,
        name: &str,
        proposed_id: &str,
        max_expiration: Option<Duration>,
    ) -> StoreResult<LeaseToken> {
        self.runtime
            .block_on(self.inner.acquire_with_retry(name, proposed_id, max_expiration))
    }

    pub fn renew(&self, token: &LeaseToken) -> StoreResult<()> {
        self.runtime.block_on(self.inner.renew(token))
    }

    pub fn release(&self, token: &LeaseToken) -> StoreResult<()> {
        self.runtime.block_on(self.inner.release(token))
    }

    pub fn break_lease(&self, name: &str) -> StoreResult<()> {
        self.runtime.block_on(self.inner.break_lease(name))
    }
}
