//! Best-effort upstream calls that outlive the request that triggered them

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Tracked set of detached tasks (resource DELETEs, analysis stop calls)
#[derive(Default)]
pub(crate) struct BackgroundTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and keep its handle until it finishes or is drained
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    /// Number of tasks still running
    pub(crate) fn pending(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait for every tracked task, aborting those still running at `timeout`
    ///
    /// Returns the number of aborted tasks.
    pub(crate) async fn drain(&self, timeout: Duration) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;

        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task failed: {}", e),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
