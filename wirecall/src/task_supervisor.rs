use std::{
    fmt::Display,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

use crate::Result;

/// Shared counters and tokens behind a supervisor and its guards.
#[derive(Debug, Default)]
struct TaskSupervisorState {
    /// Number of live guards, including the supervisor's own.
    running: AtomicU64,
    /// Cancelled when stop is requested.
    stop: CancellationToken,
    /// Cancelled once the last guard is dropped.
    stopped: CancellationToken,
}

impl TaskSupervisorState {
    fn finish_async_task(&self) {
        let running = self.running.fetch_sub(1, Ordering::AcqRel) - 1;
        if running == 0 {
            self.stopped.cancel();
        }
    }
}

/// Tracks the accept loops and connection tasks of a server so that
/// [`TaskSupervisor::stop`] can cancel them and
/// [`TaskSupervisor::all_stopped`] can wait for them.
///
/// Dropping the supervisor stops its tasks.
///
/// # Examples
///
/// ```rust,no_run
/// # use wirecall::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::create();
/// supervisor.spawn("heartbeat", async {
///     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
///     Ok(())
/// });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TaskSupervisor(Arc<TaskSupervisorState>);

/// RAII guard counting one running task.
///
/// Dropping the last guard after stop was requested completes
/// [`TaskSupervisor::all_stopped`].
#[derive(Debug)]
pub struct TaskSupervisorGuard(Arc<TaskSupervisorState>);

impl TaskSupervisor {
    /// Creates a supervisor with no tasks.
    ///
    /// It holds one guard of its own until [`TaskSupervisor::stop`], so
    /// `all_stopped` cannot complete before stop is requested. Must be
    /// called inside a tokio runtime.
    #[must_use]
    pub fn create() -> Self {
        let supervisor = Self(Arc::default());

        // keeps the count above zero until stop is requested.
        let guard = supervisor.start_async_task();
        tokio::spawn(async move {
            guard.stopped().await;
        });

        supervisor
    }

    /// Requests every supervised task to stop. Idempotent.
    pub fn stop(&self) {
        self.0.stop.cancel();
    }

    /// Returns a guard that requests stop when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.0.stop.clone().drop_guard()
    }

    /// Completes once stop has been requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Completes once stop has been requested and every task has finished.
    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stopped.cancelled()
    }

    /// Registers one running task.
    ///
    /// # Returns
    ///
    /// Returns a guard; the task counts as running until it is dropped.
    #[must_use]
    pub fn start_async_task(&self) -> TaskSupervisorGuard {
        self.0.running.fetch_add(1, Ordering::AcqRel);
        TaskSupervisorGuard(self.0.clone())
    }

    /// Spawns `task` until it finishes or stop is requested.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used when logging a stop or a failure
    /// * `task` - The future to run; an `Err` outcome is logged at error level
    pub fn spawn<F>(&self, name: impl Display + Send + 'static, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = self.start_async_task();
        tokio::spawn(async move {
            tokio::select! {
                () = guard.stopped() => {
                    tracing::debug!("{name} stopped");
                }
                r = task => {
                    if let Err(e) = r {
                        tracing::error!("{name} failed: {e}");
                    }
                }
            }
        });
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskSupervisorGuard {
    /// Completes once stop has been requested on the owning supervisor.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }
}

impl Drop for TaskSupervisorGuard {
    fn drop(&mut self) {
        self.0.finish_async_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, ErrorKind};

    #[tokio::test]
    async fn test_task_supervisor() {
        let supervisor = TaskSupervisor::create();
        assert_eq!(supervisor.0.running.load(Ordering::Acquire), 1);

        supervisor.spawn("pending", std::future::pending());
        supervisor.spawn("failing", async { Err(Error::kind(ErrorKind::Timeout)) });

        supervisor.stop();
        supervisor.stopped().await;
        supervisor.all_stopped().await;
        assert_eq!(supervisor.0.running.load(Ordering::Acquire), 0);
    }
}
