use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub async fn customer_ws_handler(
    ws: WebSocketUpgrade,
    Path(customer_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, customer_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, customer_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut messages = Box::pin(BroadcastStream::new(state.customer_events_tx.subscribe()).filter_map(
        move |result| async move {
            match result {
                Ok(message) if message.customer_id == customer_id => Some(message.event),
                Ok(_) => None,
                Err(err) => {
                    warn!(customer_id = %customer_id, error = %err, "customer channel lagged");
                    None
                }
            }
        },
    ));

    info!(customer_id = %customer_id, "customer tracking session opened");

    let send_task = tokio::spawn(async move {
        while let Some(event) = messages.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracking event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(customer_id = %customer_id, "customer tracking session closed");
}
