use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::tracking::{CustomerMessage, TrackingEvent};

/// Push transport towards customers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit_to_customer(&self, customer_id: Uuid, event: TrackingEvent) -> AppResult<()>;
}

/// Publishes customer messages on a broadcast channel consumed by WebSocket sessions.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<CustomerMessage>,
}

impl ChannelNotifier {
    pub fn new(tx: broadcast::Sender<CustomerMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn emit_to_customer(&self, customer_id: Uuid, event: TrackingEvent) -> AppResult<()> {
        // Nobody listening is not a failure: the customer simply has no open session.
        if self.tx.receiver_count() == 0 {
            return Ok(());
        }

        self.tx
            .send(CustomerMessage { customer_id, event })
            .map(|_| ())
            .map_err(|err| AppError::Internal(format!("customer channel send failed: {err}")))
    }
}
