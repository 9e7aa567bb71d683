//! Per-account inventory poller.
//!
//! One background task per account: fires an initial poll right after
//! account add, then sleeps the account's poll interval between cycles. The
//! sleep is cut short by `poke` (selector sync-now, cache reset) and the
//! whole task is aborted on account removal.

use crate::types::NamespacedName;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to one account's poll loop.
pub struct PollerHandle {
    handle: JoinHandle<()>,
    wakeup: Arc<Notify>,
}

impl PollerHandle {
    /// Forces the next poll to run now instead of at the next tick.
    pub fn poke(&self) {
        self.wakeup.notify_one();
    }

    /// Stops the loop; any in-flight cloud call is abandoned best-effort.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns the poll loop. `poll_cycle` performs one poll (recording its own
/// outcome in the account stats) and returns the interval to sleep before
/// the next cycle.
pub fn spawn_poller<F, Fut>(account: NamespacedName, poll_cycle: F) -> PollerHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Duration> + Send,
{
    let wakeup = Arc::new(Notify::new());
    let task_wakeup = wakeup.clone();
    let handle = tokio::spawn(async move {
        loop {
            let interval = poll_cycle().await;
            debug!(account = %account, ?interval, "inventory poll cycle complete");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = task_wakeup.notified() => {
                    debug!(account = %account, "inventory poll wakeup");
                }
            }
        }
    });
    PollerHandle { handle, wakeup }
}
