//! Outbound relay contract.
//!
//! The core treats relay delivery as a pluggable capability; the shipped
//! implementation only records the attempt. A real SMTP client leg slots in
//! behind [`RelayDelivery`] without touching the processor.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tracing::info;

use crate::error::DeliveryError;

/// Per-recipient wall budget for relay delivery.
pub const RELAY_DELIVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait RelayDelivery: Send + Sync + std::fmt::Debug {
    /// Deliver one spooled body to one remote recipient.
    async fn deliver(&self, message_path: &Path, recipient: &str)
        -> Result<(), DeliveryError>;
}

/// Relay that records the attempt and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyRelay;

#[async_trait]
impl RelayDelivery for LogOnlyRelay {
    async fn deliver(
        &self,
        message_path: &Path,
        recipient: &str,
    ) -> Result<(), DeliveryError> {
        info!(
            recipient,
            message_path = %message_path.display(),
            "relay delivery (log only)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn log_only_relay_accepts() {
        let relay = LogOnlyRelay;
        let result = relay
            .deliver(Path::new("/tmp/none.eml"), "remote@relay.example")
            .await;
        assert!(result.is_ok());
    }
}
