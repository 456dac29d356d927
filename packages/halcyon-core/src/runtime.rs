//! Task spawning abstraction for runtime independence.
//!
//! Core services run their polling loops as background tasks but must not
//! care which executor drives them. [`TaskSpawner`] is that seam; embedders
//! supply their own implementation, the standalone server uses Tokio
//! through [`TokioSpawner`].

use std::future::Future;

/// Abstraction for spawning named background tasks.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a fire-and-forget background task.
    ///
    /// The name feeds logging only. There is no join or cancel here; tasks
    /// stop through the cancellation tokens their owners hold.
    fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// [`TaskSpawner`] backed by a Tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is already on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        log::debug!("[Runtime] Spawning {} task", name);
        self.handle.spawn(async move {
            future.await;
            log::debug!("[Runtime] Task {} finished", name);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn("test", async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        // Give the task time to execute
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(executed.load(Ordering::SeqCst));
    }
}
