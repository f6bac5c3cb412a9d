//! Notification transport abstraction (§4.5, §6: `notification` step type
//! `{type ∈ {email, log}, …}`). Email wiring is explicitly out of scope
//! (§1); the `log` transport is the default and the only one implemented
//! here, with email left as a documented extension point.

use async_trait::async_trait;
use tracing::info;

use crate::Result;

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, subject: &str, message: &str) -> Result<()>;
}

/// Writes notifications through `tracing` instead of an external channel.
#[derive(Default)]
pub struct LogNotificationTransport;

#[async_trait]
impl NotificationTransport for LogNotificationTransport {
    async fn send(&self, subject: &str, message: &str) -> Result<()> {
        info!(subject, message, "notification dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_transport_always_succeeds() {
        let transport = LogNotificationTransport;
        assert!(transport.send("subject", "body").await.is_ok());
    }
}
