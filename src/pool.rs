//! Bounded pool for blocking producers.
//!
//! Blocking work runs on tokio's blocking threads, gated by a semaphore so at
//! most `size` jobs run at once and the async workers are never stalled.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::BLOCKING_POOL_MULTIPLIER;
use crate::error_handling::ClientError;

/// A semaphore-gated front to `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    /// Creates a pool running at most `size` jobs at once (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` on a blocking thread once a permit is free.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Worker` if the job panics or is cancelled.
    pub async fn run<T, F>(&self, job: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::Worker("blocking pool is shut down".to_string()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                ClientError::Worker("blocking job panicked".to_string())
            } else {
                ClientError::Worker(e.to_string())
            }
        })
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(num_cpus::get() * BLOCKING_POOL_MULTIPLIER)
    }
}
