//! Bounded worker pool for CPU-bound batch items.
//!
//! Each item runs on the blocking thread pool behind a semaphore permit and
//! its own timeout. Results come back in input order, one `Result` per item.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::PirConfig;
use crate::error::{PirError, Result};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    item_timeout: Duration,
}

impl WorkerPool {
    pub fn new(size: usize, item_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            item_timeout,
        }
    }

    pub fn from_config(config: &PirConfig) -> Self {
        Self::new(config.pool_size, config.item_timeout())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn item_timeout(&self) -> Duration {
        self.item_timeout
    }

    /// Run `work` over every item. A timed-out item reports
    /// [`PirError::Timeout`]; a panicking item reports [`PirError::Worker`].
    /// Neither is retried. A timed-out item keeps its permit until its
    /// blocking work actually returns.
    pub async fn run<T, R, F>(&self, items: Vec<T>, work: F) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Result<R> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(items.len());

        for (position, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let work = Arc::clone(&work);
            let timeout = self.item_timeout;

            handles.push(tokio::spawn(async move {
                let permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| PirError::Worker(e.to_string()))?;
                // the permit lives as long as the blocking work, even past a timeout
                let task = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    work(item)
                });
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => {
                        tracing::error!(position, error = %join_err, "batch item panicked");
                        Err(PirError::Worker(join_err.to_string()))
                    }
                    Err(_) => {
                        tracing::warn!(position, ?timeout, "batch item timed out");
                        Err(PirError::Timeout(timeout))
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(PirError::Worker(join_err.to_string())),
            });
        }
        results
    }
}
