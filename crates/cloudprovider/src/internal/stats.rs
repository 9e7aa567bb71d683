//! Per-account poll statistics and the bounded inventory-init wait.

use crate::error::CloudError;
use crate::types::NamespacedName;
use chrono::{DateTime, Utc};
use crds::PollStatus;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct StatsInner {
    initialized: bool,
    last_poll_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Thread-safe poll stats for one account.
#[derive(Debug, Default)]
pub struct InventoryStats {
    inner: Mutex<StatsInner>,
}

impl InventoryStats {
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.initialized = true;
        inner.last_poll_time = Some(Utc::now());
        inner.last_error = None;
    }

    pub fn record_error(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_error = Some(error.to_string());
    }

    /// Back to the never-polled state.
    pub fn reset(&self) {
        *self.inner.lock().unwrap() = StatsInner::default();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().unwrap().initialized
    }

    pub fn poll_status(&self) -> PollStatus {
        let inner = self.inner.lock().unwrap();
        PollStatus {
            last_poll_time: inner.last_poll_time,
            error: inner.last_error.clone(),
        }
    }
}

/// Blocks until `stats` reports an initialized inventory or `timeout`
/// elapses, polling with exponential backoff between checks.
pub async fn wait_for_inventory_init(
    stats: &InventoryStats,
    account: &NamespacedName,
    timeout: Duration,
) -> Result<(), CloudError> {
    let deadline = Instant::now() + timeout;
    let mut delay = Duration::from_millis(500);
    loop {
        if stats.is_initialized() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(CloudError::InventoryNotInitialized(account.to_string()));
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 3 / 2).min(Duration::from_secs(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_lifecycle() {
        let stats = InventoryStats::default();
        assert!(!stats.is_initialized());

        stats.record_error("throttled");
        assert!(!stats.is_initialized());
        assert_eq!(stats.poll_status().error.as_deref(), Some("throttled"));

        stats.record_success();
        assert!(stats.is_initialized());
        let status = stats.poll_status();
        assert!(status.error.is_none());
        assert!(status.last_poll_time.is_some());

        stats.reset();
        assert!(!stats.is_initialized());
        assert!(stats.poll_status().last_poll_time.is_none());
    }

    #[tokio::test]
    async fn wait_times_out_when_inventory_never_initializes() {
        let stats = InventoryStats::default();
        let account = NamespacedName::new("ns", "acct");
        let result =
            wait_for_inventory_init(&stats, &account, Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(CloudError::InventoryNotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn wait_returns_once_initialized() {
        let stats = InventoryStats::default();
        stats.record_success();
        let account = NamespacedName::new("ns", "acct");
        wait_for_inventory_init(&stats, &account, Duration::from_millis(50))
            .await
            .unwrap();
    }
}
