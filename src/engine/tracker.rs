use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CachedLocation;
use crate::engine::broadcaster::publish;
use crate::engine::deliveries::{find_by_tracking_code, load_delivery, mutate_delivery};
use crate::engine::drivers::load_driver;
use crate::engine::transitions::{self, Transition, TransitionInput};
use crate::error::{AppError, AppResult};
use crate::geo::{distance_km, eta_minutes, validate_point};
use crate::models::delivery::{Delivery, DeliveryStatus, LocationSample, PublicDelivery};
use crate::models::driver::{Driver, DriverCard, DriverLocation, GeoPoint, VehicleType};
use crate::models::tracking::{
    ArrivalKind, DeliveryEstimate, LocationFix, LocationUpdateOutcome, NearbyDriver,
    TrackingData, TrackingEvent, TrackingSnapshot, TrackingUpdate, UnavailableReason,
};
use crate::state::AppState;

/// Distance assumed between the restaurant and the nearest idle driver when no
/// driver has been picked yet.
const ASSUMED_PICKUP_KM: f64 = 2.0;
const ASSUMED_VEHICLE: VehicleType = VehicleType::Scooter;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicTracking {
    pub delivery: PublicDelivery,
    pub tracking: TrackingData,
}

pub async fn update_driver_location(
    state: &AppState,
    driver_id: Uuid,
    fix: LocationFix,
    now: DateTime<Utc>,
) -> AppResult<LocationUpdateOutcome> {
    let start = Instant::now();
    let result = process_location(state, driver_id, fix, now).await;

    let outcome = match &result {
        Ok(update) if update.delivery_id.is_some() => "tracked",
        Ok(_) => "idle",
        Err(err) => err.kind(),
    };
    state
        .metrics
        .location_updates_total
        .with_label_values(&[outcome])
        .inc();
    state
        .metrics
        .location_update_latency_seconds
        .observe(start.elapsed().as_secs_f64());

    result
}

async fn process_location(
    state: &AppState,
    driver_id: Uuid,
    fix: LocationFix,
    now: DateTime<Utc>,
) -> AppResult<LocationUpdateOutcome> {
    let point = fix.point();
    validate_point(&point)?;
    if fix.accuracy.is_some_and(|accuracy| !accuracy.is_finite() || accuracy < 0.0) {
        return Err(AppError::InvalidInput(
            "accuracy must be a non-negative number of meters".to_string(),
        ));
    }

    let driver = load_driver(state, driver_id).await?;
    if let Some(current) = driver.current_location {
        if now < current.updated_at {
            return Err(AppError::Conflict(format!(
                "location for driver {driver_id} at {now} is older than the last report at {}",
                current.updated_at
            )));
        }
    }

    state
        .cache
        .put(
            driver_id,
            CachedLocation {
                location: point,
                accuracy: fix.accuracy,
                recorded_at: now,
            },
        )
        .await?;
    state
        .store
        .set_driver_location(
            driver_id,
            DriverLocation {
                location: point,
                updated_at: now,
            },
        )
        .await?;

    let Some(delivery) = state
        .store
        .find_driver_delivery(driver_id, &DeliveryStatus::TRACKED)
        .await?
    else {
        debug!(driver_id = %driver_id, "location stored; no tracked delivery");
        return Ok(LocationUpdateOutcome::idle(driver_id));
    };

    let sample = LocationSample {
        lat: point.lat,
        lng: point.lng,
        recorded_at: now,
        accuracy: fix.accuracy,
    };
    let history_recorded = state
        .store
        .append_location_sample(delivery.id, sample, state.settings.history_interval())
        .await?;
    if history_recorded {
        state.metrics.location_history_appends_total.inc();
    }

    let destination = delivery.current_destination().location;
    let distance = distance_km(&point, &destination);
    let eta = eta_minutes(distance, Some(driver.vehicle_type), true);

    let mut status = delivery.status;
    let mut arrival = None;
    if distance * 1000.0 <= state.settings.arrival_radius_meters {
        match detect_arrival(state, &delivery, now).await {
            Ok(Some((kind, new_status))) => {
                state
                    .metrics
                    .arrivals_total
                    .with_label_values(&[kind.as_str()])
                    .inc();
                info!(delivery_id = %delivery.id, driver_id = %driver_id, kind = kind.as_str(), "arrival detected");
                arrival = Some(kind);
                status = new_status;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(delivery_id = %delivery.id, error = %err, "arrival detection failed; will retry on next update");
            }
        }
    }

    publish(
        state,
        TrackingEvent::LocationUpdated(TrackingUpdate {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            driver: DriverCard::from(&driver),
            location: point,
            destination,
            distance_km: distance,
            eta_minutes: eta,
            status,
            at: now,
        }),
    );

    Ok(LocationUpdateOutcome {
        driver_id,
        delivery_id: Some(delivery.id),
        status: Some(status),
        history_recorded,
        distance_km: Some(distance),
        eta_minutes: Some(eta),
        arrival,
    })
}

async fn detect_arrival(
    state: &AppState,
    delivery: &Delivery,
    now: DateTime<Utc>,
) -> AppResult<Option<(ArrivalKind, DeliveryStatus)>> {
    match delivery.status {
        DeliveryStatus::Accepted if delivery.arrived_at_restaurant_at.is_none() => {
            let (written, marked) = mutate_delivery(state, delivery.id, |fresh| {
                Ok(transitions::mark_arrived_at_restaurant(fresh, now))
            })
            .await?;
            Ok(marked.then_some((ArrivalKind::Restaurant, written.status)))
        }
        DeliveryStatus::InTransit => {
            let (written, arrived) = mutate_delivery(state, delivery.id, |fresh| {
                if fresh.status != DeliveryStatus::InTransit {
                    return Ok(false);
                }
                transitions::apply(fresh, Transition::Arrive, TransitionInput::default(), now)?;
                Ok(true)
            })
            .await?;
            if arrived {
                state
                    .metrics
                    .record_transition(Transition::Arrive.as_str(), "ok");
            }
            Ok(arrived.then_some((ArrivalKind::Customer, written.status)))
        }
        _ => Ok(None),
    }
}

/// Best known position of a driver: a fresh cache entry first, the persisted
/// location otherwise.
pub async fn current_location(
    state: &AppState,
    driver: &Driver,
    now: DateTime<Utc>,
) -> Option<DriverLocation> {
    match state
        .cache
        .get_fresh(driver.id, now, state.settings.location_ttl())
        .await
    {
        Ok(Some(cached)) => {
            return Some(DriverLocation {
                location: cached.location,
                updated_at: cached.recorded_at,
            });
        }
        Ok(None) => {}
        Err(err) => {
            warn!(driver_id = %driver.id, error = %err, "location cache read failed; using stored location");
        }
    }
    driver.current_location
}

pub async fn get_tracking_data(
    state: &AppState,
    delivery_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<TrackingData> {
    let delivery = load_delivery(state, delivery_id).await?;
    tracking_for(state, &delivery, now).await
}

pub async fn get_tracking_by_code(
    state: &AppState,
    code: &str,
    now: DateTime<Utc>,
) -> AppResult<PublicTracking> {
    let delivery = find_by_tracking_code(state, code).await?;
    let tracking = tracking_for(state, &delivery, now).await?;
    Ok(PublicTracking {
        delivery: PublicDelivery::from(&delivery),
        tracking,
    })
}

async fn tracking_for(
    state: &AppState,
    delivery: &Delivery,
    now: DateTime<Utc>,
) -> AppResult<TrackingData> {
    let unavailable = |reason| TrackingData::Unavailable { reason };

    let Some(driver_id) = delivery.driver_id else {
        return Ok(unavailable(UnavailableReason::NoDriverAssigned));
    };
    let Some(driver) = state.store.get_driver(driver_id).await? else {
        return Ok(unavailable(UnavailableReason::NoDriverAssigned));
    };
    let Some(position) = current_location(state, &driver, now).await else {
        return Ok(unavailable(UnavailableReason::LocationUnknown));
    };

    let destination = delivery.current_destination().location;
    let distance = distance_km(&position.location, &destination);

    Ok(TrackingData::Live(TrackingSnapshot {
        delivery_id: delivery.id,
        status: delivery.status,
        driver: DriverCard::from(&driver),
        current_location: position.location,
        location_updated_at: position.updated_at,
        pickup: delivery.pickup.clone(),
        destination: delivery.destination.clone(),
        distance_km: distance,
        eta_minutes: eta_minutes(distance, Some(driver.vehicle_type), true),
        is_picked_up: delivery.status.is_picked_up(),
    }))
}

/// Estimate used before any driver is assigned: preparation, a short pickup
/// leg and the restaurant-to-customer leg.
pub fn estimate_delivery_time(
    restaurant: &GeoPoint,
    customer: &GeoPoint,
    prep_minutes: u32,
) -> AppResult<DeliveryEstimate> {
    validate_point(restaurant)?;
    validate_point(customer)?;

    let distance = distance_km(restaurant, customer);
    let pickup_minutes = eta_minutes(ASSUMED_PICKUP_KM, Some(ASSUMED_VEHICLE), true);
    let delivery_minutes = eta_minutes(distance, Some(ASSUMED_VEHICLE), true);

    Ok(DeliveryEstimate {
        prep_minutes,
        pickup_minutes,
        delivery_minutes,
        distance_km: distance,
        total_minutes: prep_minutes
            .saturating_add(pickup_minutes)
            .saturating_add(delivery_minutes),
    })
}

/// Linear scan over on-shift drivers. Fine for a city fleet; a spatial index
/// belongs in the store once fleets grow.
pub async fn get_nearby_drivers(
    state: &AppState,
    location: &GeoPoint,
    radius_km: f64,
) -> AppResult<Vec<NearbyDriver>> {
    validate_point(location)?;
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(AppError::InvalidInput(format!(
            "radius must be a non-negative number of km, got {radius_km}"
        )));
    }

    let mut nearby: Vec<NearbyDriver> = state
        .store
        .list_drivers()
        .await?
        .iter()
        .filter(|driver| driver.is_on_shift())
        .filter_map(|driver| {
            let position = driver.current_location?;
            let distance = distance_km(location, &position.location);
            (distance <= radius_km).then(|| NearbyDriver {
                driver: DriverCard::from(driver),
                location: position.location,
                distance_km: distance,
                is_available: driver.is_available,
            })
        })
        .collect();

    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    Ok(nearby)
}

/// Tells the customer that live tracking began. No lifecycle effect.
pub async fn start_tracking(state: &AppState, delivery: &Delivery, now: DateTime<Utc>) {
    let driver = match delivery.driver_id {
        Some(driver_id) => match state.store.get_driver(driver_id).await {
            Ok(driver) => driver.as_ref().map(DriverCard::from),
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "driver lookup failed for tracking start");
                None
            }
        },
        None => None,
    };

    publish(
        state,
        TrackingEvent::TrackingStarted {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            tracking_code: delivery.tracking_code.clone(),
            driver,
            at: now,
        },
    );
}

/// Tells the customer that live tracking ended and drops the driver's cached location.
pub async fn stop_tracking(
    state: &AppState,
    delivery: &Delivery,
    driver_id: Option<Uuid>,
    now: DateTime<Utc>,
) {
    if let Some(driver_id) = driver_id {
        if let Err(err) = state.cache.evict(driver_id).await {
            warn!(driver_id = %driver_id, error = %err, "failed to evict cached location");
        }
    }

    publish(
        state,
        TrackingEvent::TrackingStopped {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            status: delivery.status,
            at: now,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::estimate_delivery_time;
    use crate::models::driver::GeoPoint;

    #[test]
    fn estimate_adds_prep_pickup_and_delivery_legs() {
        let restaurant = GeoPoint {
            lat: 52.5200,
            lng: 13.4050,
        };
        let estimate = estimate_delivery_time(&restaurant, &restaurant, 15).unwrap();

        assert_eq!(estimate.pickup_minutes, 7);
        assert_eq!(estimate.delivery_minutes, 0);
        assert_eq!(estimate.total_minutes, 22);
    }

    #[test]
    fn estimate_rejects_bad_coordinates() {
        let ok = GeoPoint { lat: 0.0, lng: 0.0 };
        let bad = GeoPoint {
            lat: 120.0,
            lng: 0.0,
        };
        assert!(estimate_delivery_time(&ok, &bad, 10).is_err());
    }
}
