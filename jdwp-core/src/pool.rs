// Bounded pool for reply continuations
//
// Continuations may block (including blocking waits on further replies), so
// they run on tokio's blocking threads. A semaphore bounds how many run at once.

use crate::error::{JdwpError, JdwpResult};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle workers
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on a pool worker once one is free
    pub async fn run<F, T>(&self, f: F) -> JdwpResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JdwpError::Disconnected)?;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        match task.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(JdwpError::Programmer(
                "Continuation cancelled by runtime shutdown".to_string(),
            )),
        }
    }
}
