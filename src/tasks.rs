//! Background completion tasks with per-batch cancellation
//!
//! Every async workflow step runs as a task under a batch scope. Cancelling a
//! scope (workflow reset) or the root (shutdown) stops pending tasks before
//! they touch the store.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{Error, Result};

pub(crate) struct BackgroundTasks {
    handle: Handle,
    root: CancellationToken,
    tracker: TaskTracker,
    scopes: Mutex<HashMap<String, CancellationToken>>,
}

impl BackgroundTasks {
    /// Bind to the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        Ok(Self::new(handle))
    }

    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub fn ensure_running(&self) -> Result<()> {
        if self.root.is_cancelled() {
            Err(Error::ShutDown)
        } else {
            Ok(())
        }
    }

    fn scope(&self, batch_id: &str) -> CancellationToken {
        self.scopes
            .lock()
            .entry(batch_id.to_string())
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// Run `task` under the batch scope. The task receives the scope token
    /// and is expected to race its work against `cancelled()`.
    pub fn spawn<F, Fut>(&self, batch_id: &str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.scope(batch_id);
        self.tracker.spawn_on(task(token), &self.handle);
    }

    /// Cancel everything pending for a batch. Later spawns get a fresh scope.
    pub fn cancel_batch(&self, batch_id: &str) {
        if let Some(token) = self.scopes.lock().remove(batch_id) {
            tracing::debug!(batch = %batch_id, "Cancelling pending tasks");
            token.cancel();
        }
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel all scopes and wait for every task to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.scopes.lock().clear();
    }

    /// Synchronous half of shutdown, for `Drop`.
    pub fn cancel_all(&self) {
        self.root.cancel();
        self.tracker.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_task(counter: Arc<AtomicUsize>) -> impl FnOnce(CancellationToken) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        move |token| {
            Box::pin(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_to_completion() {
        let tasks = BackgroundTasks::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.spawn("batch-1", counting_task(counter.clone()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_batch_only_hits_that_batch() {
        let tasks = BackgroundTasks::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.spawn("batch-1", counting_task(counter.clone()));
        tasks.spawn("batch-2", counting_task(counter.clone()));

        tasks.cancel_batch("batch-1");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_and_rejects() {
        let tasks = BackgroundTasks::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        tasks.spawn("batch-1", counting_task(counter.clone()));

        tasks.shutdown().await;
        assert_eq!(tasks.pending(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(matches!(tasks.ensure_running(), Err(Error::ShutDown)));
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(BackgroundTasks::current(), Err(Error::Runtime(_))));
    }
}
