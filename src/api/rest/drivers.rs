use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::drivers::{self, RegisterDriver};
use crate::engine::tracker;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::tracking::{LocationFix, LocationUpdateOutcome, NearbyDriver};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/nearby", get(nearby_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/verify", post(verify_driver))
        .route("/drivers/:id/online", post(go_online))
        .route("/drivers/:id/offline", post(go_offline))
        .route("/drivers/:id/location", post(update_location))
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
}

fn default_radius_km() -> f64 {
    5.0
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriver>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(drivers::register_driver(&state, payload, Utc::now()).await?))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(drivers::list_drivers(&state).await?))
}

async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyDriver>>, AppError> {
    let location = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    Ok(Json(
        tracker::get_nearby_drivers(&state, &location, query.radius_km).await?,
    ))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(drivers::load_driver(&state, id).await?))
}

async fn verify_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(drivers::verify_driver(&state, id, &actor, Utc::now()).await?))
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(drivers::go_online(&state, id, &actor, Utc::now()).await?))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(drivers::go_offline(&state, id, &actor, Utc::now()).await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(fix): Json<LocationFix>,
) -> Result<Json<LocationUpdateOutcome>, AppError> {
    if actor != Actor::driver(id) {
        return Err(AppError::Unauthorized(format!(
            "{actor} cannot report locations for driver {id}"
        )));
    }

    Ok(Json(
        tracker::update_driver_location(&state, id, fix, Utc::now()).await?,
    ))
}
