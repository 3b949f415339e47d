pub mod deliveries;
pub mod drivers;
pub mod orders;
pub mod principal;
pub mod tracking;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(deliveries::router())
        .merge(drivers::router())
        .merge(orders::router())
        .merge(tracking::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws/customers/:customer_id", get(ws::customer_ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    deliveries: Option<usize>,
    drivers: Option<usize>,
    orders: Option<usize>,
    active_deliveries: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let memory = state.memory.as_ref();
    Json(HealthResponse {
        status: "ok",
        deliveries: memory.map(|store| store.delivery_count()),
        drivers: memory.map(|store| store.driver_count()),
        orders: memory.map(|store| store.order_count()),
        active_deliveries: state.metrics.active_deliveries.get(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
