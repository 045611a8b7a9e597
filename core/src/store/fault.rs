use parking_lot::Mutex;

use super::error::{StoreError, StoreResult};

/// Scripted failure for an in-memory backend.
#[derive(Debug, Clone)]
pub struct Fault {
    operation: &'static str,
    entity: Option<String>,
    error: StoreError,
    remaining: Option<u32>,
}

impl Fault {
    /// Fail every call to `operation` with `error`.
    pub fn new(operation: &'static str, error: StoreError) -> Self {
        Self {
            operation,
            entity: None,
            error,
            remaining: None,
        }
    }

    /// Only fail calls that touch `entity` (an object or station name).
    pub fn for_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Stop failing after `count` hits.
    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: Mutex<Vec<Fault>>,
}

impl FaultInjector {
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub fn clear(&self) {
        self.faults.lock().clear();
    }

    pub fn check(&self, operation: &str, entity: &str) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        let hit = faults.iter_mut().find(|fault| {
            fault.operation == operation
                && fault.entity.as_deref().map_or(true, |e| e == entity)
                && fault.remaining != Some(0)
        });
        match hit {
            Some(fault) => {
                if let Some(remaining) = fault.remaining.as_mut() {
                    *remaining -= 1;
                }
                Err(fault.error.clone().with_operation(operation).with_entity(entity))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_faults_run_out() {
        let injector = FaultInjector::default();
        injector.inject(Fault::new("download", StoreError::timeout("slow")).times(2));
        assert!(injector.check("download", "a").is_err());
        assert!(injector.check("upload", "a").is_ok());
        assert!(injector.check("download", "b").is_err());
        assert!(injector.check("download", "a").is_ok());
    }

    #[test]
    fn entity_faults_only_hit_their_entity() {
        let injector = FaultInjector::default();
        injector.inject(Fault::new("delete", StoreError::internal("boom")).for_entity("x"));
        assert!(injector.check("delete", "y").is_ok());
        assert!(injector.check("delete", "x").is_err());
        assert!(injector.check("delete", "x").is_err());
    }
}
