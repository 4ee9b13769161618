//! Lifecycle management for sensor worker tasks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry of named worker tasks sharing one shutdown token.
///
/// Each worker receives a child token and must observe cancellation within
/// one polling interval; shutdown joins everything with a timeout and
/// surfaces the first failure.
pub struct WorkerRegistry {
    workers: HashMap<String, JoinHandle<Result<()>>>,
    shutdown: CancellationToken,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// The process-wide shutdown token; cancelled exactly once, at exit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns and tracks a worker under `name`.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, worker_fn: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = self.shutdown.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("worker '{task_name}' started");
            match worker_fn(token).await {
                Ok(()) => {
                    info!("worker '{task_name}' finished");
                    Ok(())
                }
                Err(e) => {
                    error!("worker '{task_name}' failed: {e}");
                    Err(e)
                }
            }
        });

        self.workers.insert(name, handle);
    }

    /// Cancels the shutdown token and joins every worker, returning the
    /// first error encountered.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("stopping {} workers", self.workers.len());
        self.shutdown.cancel();

        let mut first_error = None;
        for (name, handle) in self.workers.drain() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    warn!("worker '{name}' failed during shutdown: {e}");
                    first_error.get_or_insert(e);
                }
                Ok(Err(e)) => {
                    let e = anyhow::anyhow!("worker '{name}' panicked: {e}");
                    error!("{e}");
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    let e = anyhow::anyhow!("worker '{name}' ignored shutdown for 10s");
                    error!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e).context("worker shutdown reported failures"),
            None => {
                info!("all workers stopped");
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
