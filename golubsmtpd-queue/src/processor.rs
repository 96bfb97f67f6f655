//! Per-message delivery orchestration.
//!
//! One processor invocation owns one message: it claims the body by moving
//! it into `processing/`, fans delivery out per recipient class in
//! parallel, aggregates the per-class outcomes, and settles the body in
//! `delivered/` or `failed/`.

use std::{path::PathBuf, sync::Arc};

use golubsmtpd_common::{config::Config, Signal};
use golubsmtpd_delivery::{
    deliver_with_workers, local, relay::RELAY_DELIVERY_TIMEOUT, virtual_user, DeliveryError,
    DeliveryResult, RecipientClass, RelayDelivery,
};
use golubsmtpd_spool::{Message, Spool, SpoolState};
use tokio::{sync::broadcast, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::stats::QueueStats;

#[derive(Debug)]
pub struct Processor {
    config: Arc<Config>,
    spool: Spool,
    relay: Arc<dyn RelayDelivery>,
    shutdown: broadcast::Sender<Signal>,
    stats: Arc<QueueStats>,
}

impl Processor {
    pub fn new(
        config: Arc<Config>,
        spool: Spool,
        relay: Arc<dyn RelayDelivery>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Self {
        Self {
            config,
            spool,
            relay,
            shutdown,
            stats: Arc::new(QueueStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Process one dequeued message to completion. Failures are logged and
    /// settle the message; nothing is re-queued here.
    pub async fn process(&self, message: Message) {
        debug!(id = %message.id, "processing message");

        if let Err(err) = self
            .spool
            .move_message(&message, SpoolState::Incoming, SpoolState::Processing)
            .await
        {
            error!(id = %message.id, %err, "failed to move message to processing");
            return;
        }

        let message_path = self.spool.message_path(SpoolState::Processing, &message);
        let results = self.run_delivery_plan(&message, message_path).await;

        let mut successful = 0usize;
        let mut failed = 0usize;
        for result in &results {
            successful += result.successful.len();
            failed += result.failed.len();

            if !result.successful.is_empty() {
                info!(
                    id = %message.id,
                    class = %result.class,
                    count = result.successful.len(),
                    "delivery successful"
                );
            }
            if !result.failed.is_empty() {
                warn!(
                    id = %message.id,
                    class = %result.class,
                    count = result.failed.len(),
                    recipients = ?result.failed,
                    "delivery failed"
                );
            }
        }

        let final_state = if failed == 0 {
            SpoolState::Delivered
        } else {
            SpoolState::Failed
        };

        if let Err(err) = self
            .spool
            .move_message(&message, SpoolState::Processing, final_state)
            .await
        {
            error!(id = %message.id, %final_state, %err, "failed to move message to final state");
            return;
        }

        self.stats.record_settled(
            final_state == SpoolState::Delivered,
            successful as u64,
            failed as u64,
        );
        info!(
            id = %message.id,
            %final_state,
            successful,
            failed,
            "message processing completed"
        );
    }

    /// Spawn one class-level dispatcher per non-empty recipient class and
    /// collect exactly that many results.
    async fn run_delivery_plan(
        &self,
        message: &Message,
        message_path: PathBuf,
    ) -> Vec<DeliveryResult> {
        let mut plan: JoinSet<DeliveryResult> = JoinSet::new();

        if !message.local_recipients.is_empty() {
            let recipients = message.local_recipients.clone();
            let max_workers = self.config.delivery.local.max_workers;
            let path = message_path.clone();
            let id = message.id.clone();
            let shutdown = self.shutdown.clone();

            plan.spawn(async move {
                deliver_with_workers(
                    &recipients,
                    max_workers,
                    RecipientClass::Local,
                    &shutdown,
                    move |recipient| {
                        let path = path.clone();
                        let id = id.clone();
                        Box::pin(async move {
                            local::deliver_to_local_user(&path, &id, &recipient).await
                        })
                    },
                )
                .await
            });
        }

        if !message.virtual_recipients.is_empty() {
            let recipients = message.virtual_recipients.clone();
            let max_workers = self.config.delivery.virtual_users.max_workers;
            let virtual_root = PathBuf::from(&self.config.delivery.virtual_users.base_dir_path);
            let path = message_path.clone();
            let id = message.id.clone();
            let shutdown = self.shutdown.clone();

            plan.spawn(async move {
                deliver_with_workers(
                    &recipients,
                    max_workers,
                    RecipientClass::Virtual,
                    &shutdown,
                    move |recipient| {
                        let path = path.clone();
                        let id = id.clone();
                        let root = virtual_root.clone();
                        Box::pin(async move {
                            virtual_user::deliver_to_virtual_user(&path, &id, &recipient, &root)
                                .await
                        })
                    },
                )
                .await
            });
        }

        if !message.relay_recipients.is_empty() {
            let recipients = message.relay_recipients.clone();
            let max_workers = self.config.delivery.local.max_workers;
            let path = message_path.clone();
            let relay = Arc::clone(&self.relay);
            let shutdown = self.shutdown.clone();

            plan.spawn(async move {
                deliver_with_workers(
                    &recipients,
                    max_workers,
                    RecipientClass::Relay,
                    &shutdown,
                    move |recipient| {
                        let path = path.clone();
                        let relay = Arc::clone(&relay);
                        Box::pin(async move {
                            tokio::time::timeout(
                                RELAY_DELIVERY_TIMEOUT,
                                relay.deliver(&path, &recipient),
                            )
                            .await
                            .map_err(|_| {
                                DeliveryError::Timeout(RELAY_DELIVERY_TIMEOUT.as_secs())
                            })?
                        })
                    },
                )
                .await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = plan.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(id = %message.id, %err, "class delivery task aborted"),
            }
        }
        results
    }
}
