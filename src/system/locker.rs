//! Named mutual exclusion for sequential operations
//!
//! One [`Locker`] serializes a single name's worth of work (an environment
//! name, a task id); [`LockerRegistry`] hands out one `Locker` per key on
//! demand so the caller never has to pre-enumerate the key space.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};

#[derive(Debug, Error)]
pub enum LockerError {
    #[error("lock is currently held")]
    Busy,

    #[error("lock acquisition was cancelled")]
    Cancelled,

    #[error("lock acquisition timed out")]
    Timeout,
}

/// A sequential locker that ensures only one operation runs at a time.
pub struct Locker {
    semaphore: Semaphore,
}

impl Locker {
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
        }
    }

    pub async fn acquire(&self) -> Result<LockerGuard<'_>, LockerError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LockerError::Cancelled)?;
        Ok(LockerGuard { _permit: permit })
    }

    pub fn try_acquire(&self) -> Result<LockerGuard<'_>, LockerError> {
        match self.semaphore.try_acquire() {
            Ok(permit) => Ok(LockerGuard { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(LockerError::Busy),
            Err(TryAcquireError::Closed) => Err(LockerError::Cancelled),
        }
    }

    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<LockerGuard<'_>, LockerError> {
        match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(LockerGuard { _permit: permit }),
            Ok(Err(_)) => Err(LockerError::Cancelled),
            Err(_) => Err(LockerError::Timeout),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for Locker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LockerGuard<'a> {
    _permit: SemaphorePermit<'a>,
}

/// Per-key lock registry. Used for per-environment-name locks on the Host
/// and Runner, and per-task-id locks on the Runner (spec.md §5).
pub struct LockerRegistry {
    lockers: DashMap<String, Arc<Locker>>,
}

impl LockerRegistry {
    pub fn new() -> Self {
        Self {
            lockers: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Arc<Locker> {
        self.lockers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Locker::new()))
            .clone()
    }
}

impl Default for LockerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release() {
        let locker = Locker::new();
        assert!(!locker.is_locked());
        let guard = locker.acquire().await.unwrap();
        assert!(locker.is_locked());
        assert!(locker.try_acquire().is_err());
        drop(guard);
        assert!(!locker.is_locked());
    }

    #[tokio::test]
    async fn acquire_timeout_expires_while_held() {
        let locker = Locker::new();
        let _guard = locker.acquire().await.unwrap();
        let result = locker.acquire_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(LockerError::Timeout)));
    }

    #[tokio::test]
    async fn registry_hands_out_one_locker_per_key() {
        let registry = LockerRegistry::new();
        let a = registry.get("env-default");
        let b = registry.get("env-default");
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.get("env-other");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
