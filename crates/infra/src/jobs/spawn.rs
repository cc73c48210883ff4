//! Background task spawning capability.
//!
//! Categorization jobs must outlive the request that started them, so the
//! orchestrator never calls `tokio::spawn` implicitly: the host hands it a
//! [`TaskSpawner`] tied to a runtime whose lifetime it controls.

use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;

/// A detached unit of background work.
pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait TaskSpawner: Send + Sync + 'static {
    /// Run `task` to completion independently of the caller.
    fn spawn(&self, task: BackgroundTask);
}

/// Spawns onto a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BackgroundTask) {
        drop(self.handle.spawn(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn spawned_task_runs_detached() {
        let spawner = TokioSpawner::current();
        let (tx, rx) = oneshot::channel();

        spawner.spawn(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }
}
