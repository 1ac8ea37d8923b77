//! In-process [`SweepLock`] for tests and single-replica deployments.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::lock::{SweepGuard, SweepLock};
use crate::store::StoreError;

/// A try-lock over a local mutex. Cloning shares the same lock.
#[derive(Clone)]
pub struct LocalSweepLock {
    inner: Arc<Mutex<()>>,
}

impl LocalSweepLock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }
}

impl Default for LocalSweepLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SweepLock for LocalSweepLock {
    async fn try_acquire(&self) -> Result<Option<Box<dyn SweepGuard>>, StoreError> {
        match Arc::clone(&self.inner).try_lock_owned() {
            Ok(guard) => Ok(Some(Box::new(LocalSweepGuard { _guard: guard }))),
            Err(_) => Ok(None),
        }
    }
}

struct LocalSweepGuard {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl SweepGuard for LocalSweepGuard {
    async fn release(self: Box<Self>) {
        // Dropping the owned guard releases the mutex.
    }
}
