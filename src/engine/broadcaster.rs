use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::models::tracking::TrackingEvent;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent,
    OrderMissing,
    CustomerMissing,
    Failed,
}

impl NotificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationOutcome::Sent => "sent",
            NotificationOutcome::OrderMissing => "order_missing",
            NotificationOutcome::CustomerMissing => "customer_missing",
            NotificationOutcome::Failed => "failed",
        }
    }
}

/// Hands an event to the broadcaster without waiting. A full queue drops the
/// event; tracking writes never wait on notification delivery.
pub fn publish(state: &AppState, event: TrackingEvent) {
    let outcome = match state.tracking_tx.try_send(event) {
        Ok(()) => "published",
        Err(TrySendError::Full(event)) => {
            warn!(
                delivery_id = %event.delivery_id(),
                event = event.label(),
                "tracking queue full; dropping event"
            );
            "dropped"
        }
        Err(TrySendError::Closed(event)) => {
            debug!(
                delivery_id = %event.delivery_id(),
                event = event.label(),
                "broadcaster not running; dropping event"
            );
            "dropped"
        }
    };

    state
        .metrics
        .tracking_events_total
        .with_label_values(&[outcome])
        .inc();
}

pub async fn run_broadcaster(state: Arc<AppState>, mut events_rx: mpsc::Receiver<TrackingEvent>) {
    info!("broadcaster started");

    while let Some(event) = events_rx.recv().await {
        notify_customer(&state, event).await;
    }

    warn!("broadcaster stopped: tracking channel closed");
}

/// Resolves the order's customer and pushes the event to them. Never fails:
/// missing recipients are skipped and transport errors are logged.
pub async fn notify_customer(state: &AppState, event: TrackingEvent) -> NotificationOutcome {
    let outcome = match state.orders.get_order(event.order_id()).await {
        Ok(Some(order)) => match order.customer_id {
            Some(customer_id) => {
                match state.notifier.emit_to_customer(customer_id, event.clone()).await {
                    Ok(()) => NotificationOutcome::Sent,
                    Err(err) => {
                        warn!(
                            delivery_id = %event.delivery_id(),
                            customer_id = %customer_id,
                            error = %err,
                            "customer notification failed"
                        );
                        NotificationOutcome::Failed
                    }
                }
            }
            None => NotificationOutcome::CustomerMissing,
        },
        Ok(None) => NotificationOutcome::OrderMissing,
        Err(err) => {
            warn!(order_id = %event.order_id(), error = %err, "order lookup failed");
            NotificationOutcome::Failed
        }
    };

    if matches!(
        outcome,
        NotificationOutcome::OrderMissing | NotificationOutcome::CustomerMissing
    ) {
        debug!(
            delivery_id = %event.delivery_id(),
            outcome = outcome.as_str(),
            "skipping customer notification"
        );
    }

    state
        .metrics
        .customer_notifications_total
        .with_label_values(&[outcome.as_str()])
        .inc();
    outcome
}
