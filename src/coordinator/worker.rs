//! Cancellable worker tasks with a bounded join

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// A spawned worker and the token that asks it to stop
pub struct WorkerHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `body` with a fresh cancellation token inside a span named `name`
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(body(cancel.clone()).instrument(info_span!("worker", worker = name)));
        Self { name, cancel, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the worker and wait up to `join_timeout` for it to exit
    ///
    /// A worker still running after the timeout is aborted. Dropping its future
    /// releases whatever it holds (serial port, inhibit child), and the abort
    /// itself is awaited before returning.
    pub async fn stop(mut self, join_timeout: Duration) {
        self.cancel.cancel();

        match tokio::time::timeout(join_timeout, &mut self.task).await {
            Ok(Ok(())) => debug!("{} worker stopped", self.name),
            Ok(Err(e)) => warn!("{} worker ended abnormally: {}", self.name, e),
            Err(_) => {
                error!(
                    "{} worker did not stop within {:?}, aborting",
                    self.name, join_timeout
                );
                self.task.abort();
                let _ = (&mut self.task).await;
            }
        }
    }
}
