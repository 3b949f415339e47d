use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{FulfillmentType, Order};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(register_order))
        .route("/orders/:id", get(get_order))
}

#[derive(Deserialize)]
pub struct RegisterOrderRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub restaurant_id: Uuid,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub fulfillment_type: FulfillmentType,
}

/// Mirrors an order of the ordering platform into the bundled in-memory directory.
async fn register_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let memory = state.memory.as_ref().ok_or_else(|| {
        AppError::Conflict("orders are owned by the external ordering platform".to_string())
    })?;

    let order = Order {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        restaurant_id: payload.restaurant_id,
        customer_id: payload.customer_id,
        fulfillment_type: payload.fulfillment_type,
        delivery_id: None,
        created_at: Utc::now(),
    };

    Ok(Json(memory.insert_order(order)?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order))
}
