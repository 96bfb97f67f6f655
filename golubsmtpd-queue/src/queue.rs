//! Bounded message queue between SMTP sessions and processors.
//!
//! Two capacity knobs shape the pipeline: the publisher-facing buffer
//! (`buffer_size`) and the processor semaphore (`max_processors`). The
//! buffer is the only handoff point between sessions and processors; once a
//! publish succeeds, the session never touches the message again.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use golubsmtpd_spool::Message;
use tokio::{
    sync::{mpsc, mpsc::error::TrySendError, RwLock, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{error::QueueError, processor::Processor, stats::{QueueStats, StatsSnapshot}};

const FALLBACK_RETRY_DELAY: Duration = Duration::from_millis(100);
const FALLBACK_MAX_RETRY_DELAY: Duration = Duration::from_secs(1);
const FALLBACK_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct QueueLimits {
    pub buffer_size: usize,
    pub max_processors: usize,
    pub publish_timeout: Duration,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl From<&golubsmtpd_common::config::QueueConfig> for QueueLimits {
    fn from(config: &golubsmtpd_common::config::QueueConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            max_processors: config.max_processors,
            publish_timeout: config.publish_timeout(),
            retry_delay: config.retry_delay(),
            max_retry_delay: config.max_retry_delay(),
        }
    }
}

#[derive(Debug)]
pub struct MessageQueue {
    limits: QueueLimits,
    processor: Arc<Processor>,

    sender: Mutex<Option<mpsc::Sender<Message>>>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,

    /// Publisher gate: once set, `publish` fails fast with `Closed`.
    closed: AtomicBool,
    /// Publishers hold read guards; shutdown phase 2 takes the write side
    /// to wait for them.
    publishers: RwLock<()>,

    semaphore: Arc<Semaphore>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<QueueStats>,
}

impl MessageQueue {
    pub fn new(limits: QueueLimits, processor: Processor) -> Self {
        let (sender, receiver) = mpsc::channel(limits.buffer_size.max(1));
        let semaphore = Arc::new(Semaphore::new(limits.max_processors));
        let stats = processor.stats();

        Self {
            limits,
            processor: Arc::new(processor),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            closed: AtomicBool::new(false),
            publishers: RwLock::new(()),
            semaphore,
            consumer: Mutex::new(None),
            stats,
        }
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the dispatcher loop. Calling twice is a no-op.
    pub fn start_consumer(&self) {
        let mut consumer = self.consumer.lock().expect("queue consumer mutex poisoned");
        if consumer.is_some() {
            return;
        }

        let Some(receiver) = self
            .receiver
            .lock()
            .expect("queue receiver mutex poisoned")
            .take()
        else {
            return;
        };

        debug!("starting message queue consumer");
        let semaphore = Arc::clone(&self.semaphore);
        let processor = Arc::clone(&self.processor);
        *consumer = Some(tokio::spawn(dispatch(receiver, semaphore, processor)));
    }

    /// Deposit a message for processing.
    ///
    /// Backpressure: a full buffer is retried with exponential backoff
    /// (`retry_delay` doubling up to `max_retry_delay`) until the
    /// `publish_timeout` wall budget runs out.
    pub async fn publish(&self, message: Message) -> Result<(), QueueError> {
        let result = self.publish_inner(message).await;
        match &result {
            Ok(()) => self.stats.record_published(),
            Err(_) => self.stats.record_publish_failure(),
        }
        result
    }

    async fn publish_inner(&self, message: Message) -> Result<(), QueueError> {
        // Read guard marks this publisher as in flight for shutdown phase 2.
        let _publisher = self.publishers.read().await;

        if self.closed.load(Ordering::Acquire) {
            debug!(id = %message.id, "queue closed, rejecting message");
            return Err(QueueError::Closed);
        }

        let Some(sender) = self
            .sender
            .lock()
            .expect("queue sender mutex poisoned")
            .clone()
        else {
            return Err(QueueError::Closed);
        };

        let mut message = match sender.try_send(message) {
            Ok(()) => {
                debug!("message published");
                return Ok(());
            }
            Err(TrySendError::Closed(_)) => return Err(QueueError::Closed),
            Err(TrySendError::Full(message)) => message,
        };

        let mut retry_delay = self.limits.retry_delay;
        if retry_delay.is_zero() {
            retry_delay = FALLBACK_RETRY_DELAY;
        }
        let mut max_delay = self.limits.max_retry_delay;
        if max_delay.is_zero() {
            max_delay = FALLBACK_MAX_RETRY_DELAY;
        }
        let mut publish_timeout = self.limits.publish_timeout;
        if publish_timeout.is_zero() {
            publish_timeout = FALLBACK_PUBLISH_TIMEOUT;
        }
        let start = Instant::now();

        loop {
            warn!(
                id = %message.id,
                ?retry_delay,
                elapsed = ?start.elapsed(),
                "queue full, retrying"
            );

            if start.elapsed() >= publish_timeout {
                error!(
                    id = %message.id,
                    total_wait = ?start.elapsed(),
                    "queue full timeout exceeded, rejecting message"
                );
                return Err(QueueError::Full);
            }

            tokio::time::sleep(retry_delay).await;

            if self.closed.load(Ordering::Acquire) {
                debug!(id = %message.id, "queue closed during retry");
                return Err(QueueError::Closed);
            }

            match sender.try_send(message) {
                Ok(()) => {
                    info!(total_wait = ?start.elapsed(), "message published after retry");
                    return Ok(());
                }
                Err(TrySendError::Closed(_)) => return Err(QueueError::Closed),
                Err(TrySendError::Full(returned)) => {
                    message = returned;
                    if retry_delay < max_delay {
                        retry_delay = (retry_delay * 2).min(max_delay);
                    }
                }
            }
        }
    }

    /// Strictly ordered shutdown.
    ///
    /// Phase 1 closes the publisher gate, phase 2 waits for in-flight
    /// publishers, phase 3 closes the buffer so the dispatcher drains,
    /// phase 4 waits for the dispatcher and its processors. The whole call
    /// is bounded by `deadline`.
    pub async fn stop(&self, deadline: Duration) -> Result<(), QueueError> {
        info!("stopping message queue");
        let deadline_at = Instant::now() + deadline;

        self.closed.store(true, Ordering::Release);

        debug!("waiting for in-flight publishers");
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        if tokio::time::timeout(remaining, self.publishers.write())
            .await
            .is_err()
        {
            warn!("publisher shutdown timeout, forcing buffer close");
        }

        debug!("closing message buffer");
        drop(
            self.sender
                .lock()
                .expect("queue sender mutex poisoned")
                .take(),
        );

        let consumer = self
            .consumer
            .lock()
            .expect("queue consumer mutex poisoned")
            .take();

        if let Some(handle) = consumer {
            debug!("waiting for dispatcher and processors");
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("processor shutdown timeout");
                    return Err(QueueError::ShutdownTimeout);
                }
            }
        }

        info!("message queue stopped");
        Ok(())
    }
}

/// Dispatcher loop: receive, acquire one processor slot, spawn. Exits when
/// the buffer closes, then drains the remaining processors.
async fn dispatch(
    mut receiver: mpsc::Receiver<Message>,
    semaphore: Arc<Semaphore>,
    processor: Arc<Processor>,
) {
    debug!("consumer loop started");
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            maybe = receiver.recv() => match maybe {
                Some(message) => {
                    debug!(id = %message.id, "message received, acquiring processor slot");
                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };
                    let processor = Arc::clone(&processor);
                    tasks.spawn(async move {
                        let _permit = permit;
                        processor.process(message).await;
                    });
                }
                None => {
                    debug!("buffer closed, exiting consumer loop");
                    break;
                }
            },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
    debug!("consumer loop finished");
}
