//! Abort-on-drop task handles.
//!
//! Every coordinator task in the engine (fetcher loops, event
//! forwarders, multicast upstreams) is owned through a `TaskHandle`;
//! dropping the owner is how an epoch or a channel cancels its work.

use std::future::Future;

use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawns the future on the current runtime and returns its handle.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self { handle: tokio::spawn(future) }
    }

    /// Requests cancellation. Idempotent; aborting a finished task is a
    /// no-op.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
