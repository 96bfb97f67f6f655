//! Processing counters.
//!
//! Plain atomics shared between the publisher side and the processors; a
//! snapshot is cheap enough to take per log line or test assertion.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct QueueStats {
    published: AtomicU64,
    publish_failures: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    recipients_delivered: AtomicU64,
    recipients_failed: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages accepted into the buffer.
    pub published: u64,
    /// Publish calls that returned full or closed.
    pub publish_failures: u64,
    /// Messages settled in `delivered/`.
    pub delivered: u64,
    /// Messages settled in `failed/`.
    pub failed: u64,
    /// Per-recipient delivery successes.
    pub recipients_delivered: u64,
    /// Per-recipient delivery failures.
    pub recipients_failed: u64,
}

impl QueueStats {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settled(&self, delivered: bool, successful: u64, failed: u64) {
        if delivered {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.recipients_delivered
            .fetch_add(successful, Ordering::Relaxed);
        self.recipients_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            recipients_delivered: self.recipients_delivered.load(Ordering::Relaxed),
            recipients_failed: self.recipients_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod test {
    use super::QueueStats;

    #[test]
    fn counters_accumulate() {
        let stats = QueueStats::default();
        stats.record_published();
        stats.record_published();
        stats.record_publish_failure();
        stats.record_settled(true, 3, 0);
        stats.record_settled(false, 1, 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.recipients_delivered, 4);
        assert_eq!(snapshot.recipients_failed, 2);
    }
}
