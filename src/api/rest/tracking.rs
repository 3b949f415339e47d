use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::engine::tracker::{self, PublicTracking};
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::tracking::DeliveryEstimate;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/track/:tracking_code", get(track_by_code))
        .route("/estimates", post(estimate))
}

#[derive(Deserialize)]
pub struct EstimateRequest {
    pub restaurant: GeoPoint,
    pub customer: GeoPoint,
    #[serde(default)]
    pub prep_minutes: u32,
}

/// Public, unauthenticated lookup by tracking code.
async fn track_by_code(
    State(state): State<Arc<AppState>>,
    Path(tracking_code): Path<String>,
) -> Result<Json<PublicTracking>, AppError> {
    Ok(Json(
        tracker::get_tracking_by_code(&state, &tracking_code, Utc::now()).await?,
    ))
}

async fn estimate(Json(payload): Json<EstimateRequest>) -> Result<Json<DeliveryEstimate>, AppError> {
    Ok(Json(tracker::estimate_delivery_time(
        &payload.restaurant,
        &payload.customer,
        payload.prep_minutes,
    )?))
}
