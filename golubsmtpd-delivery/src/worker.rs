//! Semaphore-bounded per-recipient fan-out.
//!
//! This is the only place class-level delivery concurrency is enforced:
//! one task per recipient, at most `min(max_workers, |recipients|)` running
//! at once, outcomes aggregated into a single [`DeliveryResult`].

use std::{future::Future, pin::Pin, sync::Arc};

use ahash::AHashSet;
use golubsmtpd_common::Signal;
use tokio::{
    sync::{broadcast, Semaphore},
    task::JoinSet,
};
use tracing::{error, warn};

use crate::{DeliveryError, DeliveryOutcome, DeliveryResult, RecipientClass};

const DEFAULT_MAX_WORKERS: usize = 10;

pub type DeliverFuture = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send>>;

/// Effective parallelism for a delivery run. A zero configuration value
/// falls back to the default, and the result never exceeds the recipient
/// count.
pub fn effective_workers(configured: usize, recipient_count: usize) -> usize {
    let max_workers = if configured == 0 {
        DEFAULT_MAX_WORKERS
    } else {
        configured
    };
    max_workers.min(recipient_count)
}

/// Run `deliver_fn` for every recipient with bounded parallelism.
///
/// A shutdown signal fails recipients whose delivery has not finished;
/// already-completed outcomes are kept. Ordering within the result lists is
/// unspecified.
pub async fn deliver_with_workers<F>(
    recipients: &AHashSet<String>,
    max_workers: usize,
    class: RecipientClass,
    shutdown: &broadcast::Sender<Signal>,
    deliver_fn: F,
) -> DeliveryResult
where
    F: Fn(String) -> DeliverFuture + Send + Sync,
{
    let mut result = DeliveryResult::empty(class);
    if recipients.is_empty() {
        return result;
    }

    let workers = effective_workers(max_workers, recipients.len());
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks: JoinSet<DeliveryOutcome> = JoinSet::new();

    for recipient in recipients {
        // Acquire before spawning so at most `workers` tasks exist.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };

        let recipient = recipient.clone();
        let delivery = deliver_fn(recipient.clone());
        let mut signal = shutdown.subscribe();

        tasks.spawn(async move {
            let _permit = permit;
            let success = tokio::select! {
                _ = signal.recv() => {
                    warn!(recipient, %class, "delivery cancelled by shutdown");
                    false
                }
                outcome = delivery => match outcome {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(recipient, %class, %err, "delivery failed");
                        false
                    }
                },
            };
            DeliveryOutcome { recipient, success }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) if outcome.success => result.successful.push(outcome.recipient),
            Ok(outcome) => result.failed.push(outcome.recipient),
            Err(err) => error!(%class, %err, "delivery task aborted"),
        }
    }

    result
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn recipients(n: usize) -> AHashSet<String> {
        (0..n).map(|i| format!("user{i}@example.com")).collect()
    }

    #[test]
    fn effective_worker_bounds() {
        assert_eq!(effective_workers(0, 100), 10);
        assert_eq!(effective_workers(4, 100), 4);
        assert_eq!(effective_workers(10, 3), 3);
        assert_eq!(effective_workers(1, 1), 1);
    }

    #[tokio::test]
    async fn aggregates_mixed_outcomes() {
        let (shutdown, _) = broadcast::channel(1);
        let set = recipients(8);

        let result = deliver_with_workers(&set, 4, RecipientClass::Virtual, &shutdown, |r| {
            Box::pin(async move {
                if r.starts_with("user1") || r.starts_with("user3") {
                    Err(DeliveryError::InvalidRecipient(r))
                } else {
                    Ok(())
                }
            })
        })
        .await;

        assert_eq!(result.successful.len(), 6);
        assert_eq!(result.failed.len(), 2);
        assert!(result.failed.iter().any(|r| r.starts_with("user1")));
        assert!(result.failed.iter().any(|r| r.starts_with("user3")));
    }

    #[tokio::test]
    async fn respects_parallelism_cap() {
        let (shutdown, _) = broadcast::channel(1);
        let set = recipients(20);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let result = deliver_with_workers(&set, 3, RecipientClass::Local, &shutdown, {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            move |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                Box::pin(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            }
        })
        .await;

        assert_eq!(result.successful.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak {peak:?} exceeded cap");
    }

    #[tokio::test]
    async fn empty_recipient_set_is_a_noop() {
        let (shutdown, _) = broadcast::channel(1);
        let result = deliver_with_workers(
            &AHashSet::new(),
            4,
            RecipientClass::Relay,
            &shutdown,
            |_| Box::pin(async { Ok(()) }),
        )
        .await;
        assert!(result.successful.is_empty());
        assert!(result.failed.is_empty());
    }
}
