//! Cancellable scheduled notices for timer-driven state transitions
//! (host grace period, relay purge delay).
//!
//! A notice is an aborted-on-drop tokio task that runs its payload after a
//! delay. Each carries a generation stamp; the receiving side validates
//! the stamp against the notice it currently holds before acting, so a
//! notice that was cancelled (or superseded) after its message was already
//! in flight is ignored rather than acting on a stale schedule. Timer
//! handles are thereby consumed exactly once.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A scheduled, cancellable, generation-stamped notice.
///
/// Dropping the notice aborts the underlying task; a payload that has not
/// started running will never run.
#[derive(Debug)]
pub struct ScheduledNotice {
    generation: u64,
    task: JoinHandle<()>,
}

impl ScheduledNotice {
    /// Run `notify` after `delay`.
    ///
    /// `notify` normally posts a message carrying the same `generation`
    /// back to the mailbox that owns this notice.
    pub fn schedule<F>(generation: u64, delay: Duration, notify: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notify.await;
        });
        Self { generation, task }
    }

    /// Generation stamp this notice was armed with.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ScheduledNotice {
    fn drop(&mut self) {
        self.task.abort();
    }
}
