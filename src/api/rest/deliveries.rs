use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::deliveries::{self, CreateDelivery, DeliveryStats};
use crate::engine::tracker;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::delivery::{Delivery, DeliveryStatus, ProofOfDelivery};
use crate::models::tracking::TrackingData;
use crate::state::AppState;
use crate::store::DeliveryFilter;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery).get(list_deliveries))
        .route("/deliveries/stats", get(delivery_stats))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/assign", post(assign_driver))
        .route("/deliveries/:id/accept", post(accept_delivery))
        .route("/deliveries/:id/reject", post(reject_delivery))
        .route("/deliveries/:id/status", patch(update_status))
        .route("/deliveries/:id/complete", post(complete_delivery))
        .route("/deliveries/:id/cancel", post(cancel_delivery))
        .route("/deliveries/:id/rating", post(rate_delivery))
        .route("/deliveries/:id/tip", post(tip_delivery))
        .route("/deliveries/:id/tracking", get(tracking_data))
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub restaurant_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rating: u8,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Deserialize)]
pub struct TipRequest {
    pub amount: f64,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDelivery>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = deliveries::create_delivery(&state, payload, Utc::now()).await?;
    Ok(Json(delivery))
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<DeliveryFilter>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    Ok(Json(deliveries::list_deliveries(&state, &filter).await?))
}

async fn delivery_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DeliveryStats>, AppError> {
    Ok(Json(deliveries::get_stats(&state, query.restaurant_id).await?))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(deliveries::load_delivery(&state, id).await?))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery =
        deliveries::assign_driver(&state, id, payload.driver_id, &actor, Utc::now()).await?;
    Ok(Json(delivery))
}

async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(deliveries::accept(&state, id, &actor, Utc::now()).await?))
}

async fn reject_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = deliveries::reject(&state, id, &actor, payload.reason, Utc::now()).await?;
    Ok(Json(delivery))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = deliveries::update_status(
        &state,
        id,
        payload.status,
        &actor,
        payload.note,
        Utc::now(),
    )
    .await?;
    Ok(Json(delivery))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(proof): Json<ProofOfDelivery>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(deliveries::complete(&state, id, &actor, proof, Utc::now()).await?))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = deliveries::cancel(&state, id, &actor, payload.reason, Utc::now()).await?;
    Ok(Json(delivery))
}

async fn rate_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery =
        deliveries::rate(&state, id, payload.rating, payload.feedback, Utc::now()).await?;
    Ok(Json(delivery))
}

async fn tip_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TipRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(deliveries::tip(&state, id, payload.amount, Utc::now()).await?))
}

async fn tracking_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingData>, AppError> {
    Ok(Json(tracker::get_tracking_data(&state, id, Utc::now()).await?))
}
