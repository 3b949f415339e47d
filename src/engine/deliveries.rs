use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::drivers::{load_driver, mutate_driver};
use crate::engine::tracker::{start_tracking, stop_tracking};
use crate::engine::transitions::{self, Transition, TransitionInput};
use crate::error::{AppError, AppResult};
use crate::geo::{distance_km, eta_minutes, validate_point};
use crate::models::actor::Actor;
use crate::models::delivery::{
    Address, Delivery, DeliveryEvent, DeliveryStatus, ProofOfDelivery,
};
use crate::models::driver::{DriverStats, ShiftStatus};
use crate::models::order::FulfillmentType;
use crate::state::AppState;
use crate::store::DeliveryFilter;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDelivery {
    pub order_id: Uuid,
    pub pickup: Address,
    pub destination: Address,
    #[serde(default)]
    pub delivery_fee: Option<f64>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryStats {
    pub total: usize,
    pub by_status: BTreeMap<DeliveryStatus, usize>,
    pub average_delivery_minutes: Option<f64>,
    pub average_rating: Option<f64>,
    pub total_tips: f64,
}

pub async fn load_delivery(state: &AppState, id: Uuid) -> AppResult<Delivery> {
    state
        .store
        .get_delivery(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))
}

/// Load, change and compare-and-swap a delivery. `change` runs again on a fresh
/// copy when another writer won the race; an error from it aborts without writing.
pub async fn mutate_delivery<T, F>(
    state: &AppState,
    id: Uuid,
    mut change: F,
) -> AppResult<(Delivery, T)>
where
    F: FnMut(&mut Delivery) -> AppResult<T> + Send,
    T: Send,
{
    let mut attempt = 1;
    loop {
        let mut delivery = load_delivery(state, id).await?;
        let outcome = change(&mut delivery)?;

        match state.store.update_delivery(delivery).await {
            Ok(written) => return Ok((written, outcome)),
            Err(AppError::VersionMismatch { expected, actual })
                if attempt < state.settings.write_retries =>
            {
                debug!(delivery_id = %id, expected, actual, attempt, "delivery write raced; retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Checks that `actor` may drive the lifecycle of `delivery`.
pub fn authorize(actor: &Actor, delivery: &Delivery) -> AppResult<()> {
    match actor {
        Actor::Staff { restaurant_id } if *restaurant_id == delivery.restaurant_id => Ok(()),
        Actor::Staff { restaurant_id } => Err(AppError::Unauthorized(format!(
            "staff of restaurant {restaurant_id} cannot act on delivery {}",
            delivery.id
        ))),
        Actor::Driver { driver_id } if delivery.driver_id == Some(*driver_id) => Ok(()),
        Actor::Driver { driver_id } => Err(AppError::Unauthorized(format!(
            "delivery {} is not assigned to driver {driver_id}",
            delivery.id
        ))),
    }
}

fn authorize_assigned_driver(actor: &Actor, delivery: &Delivery) -> AppResult<Uuid> {
    match actor {
        Actor::Driver { driver_id } if delivery.driver_id == Some(*driver_id) => Ok(*driver_id),
        Actor::Driver { driver_id } => Err(AppError::Unauthorized(format!(
            "delivery {} is not assigned to driver {driver_id}",
            delivery.id
        ))),
        Actor::Staff { .. } => Err(AppError::Unauthorized(
            "only the assigned driver can respond to an assignment".to_string(),
        )),
    }
}

fn tracking_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("DLV-{}", &raw[..12])
}

fn record_outcome<T>(state: &AppState, transition: Transition, result: &AppResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    state.metrics.record_transition(transition.as_str(), outcome);
}

pub async fn create_delivery(
    state: &AppState,
    request: CreateDelivery,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    validate_point(&request.pickup.location)?;
    validate_point(&request.destination.location)?;

    let delivery_fee = request.delivery_fee.unwrap_or(0.0);
    if !delivery_fee.is_finite() || delivery_fee < 0.0 {
        return Err(AppError::InvalidInput(
            "delivery fee must be a non-negative amount".to_string(),
        ));
    }

    let order = state
        .orders
        .get_order(request.order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", request.order_id)))?;

    if order.fulfillment_type != FulfillmentType::Delivery {
        return Err(AppError::InvalidInput(format!(
            "order {} is not fulfilled by delivery",
            order.id
        )));
    }

    let estimated_distance_km = distance_km(&request.pickup.location, &request.destination.location);
    let mut delivery = Delivery {
        id: Uuid::new_v4(),
        order_id: order.id,
        restaurant_id: order.restaurant_id,
        pickup: request.pickup,
        destination: request.destination,
        status: DeliveryStatus::Pending,
        driver_id: None,
        status_history: Vec::new(),
        location_history: Vec::new(),
        estimated_distance_km,
        estimated_duration_minutes: eta_minutes(estimated_distance_km, None, true),
        delivery_fee,
        instructions: request.instructions,
        assigned_at: None,
        accepted_at: None,
        picked_up_at: None,
        arrived_at_restaurant_at: None,
        arrived_at_customer_at: None,
        actual_delivery_time: None,
        cancelled_at: None,
        proof_of_delivery: None,
        tracking_code: tracking_code(),
        customer_rating: None,
        customer_feedback: None,
        tip_amount: None,
        cancel_reason: None,
        created_at: now,
        updated_at: now,
        version: 0,
    };
    delivery.record(DeliveryEvent::Created, None, now);

    // The store is the authority on one live delivery per order.
    let delivery = state.store.insert_delivery(delivery).await?;
    state.orders.link_delivery(order.id, delivery.id).await?;
    state.metrics.active_deliveries.inc();

    info!(
        delivery_id = %delivery.id,
        order_id = %delivery.order_id,
        distance_km = delivery.estimated_distance_km,
        "delivery created"
    );

    Ok(delivery)
}

pub async fn list_deliveries(state: &AppState, filter: &DeliveryFilter) -> AppResult<Vec<Delivery>> {
    state.store.find_deliveries(filter).await
}

pub async fn find_by_tracking_code(state: &AppState, code: &str) -> AppResult<Delivery> {
    state
        .store
        .find_delivery_by_tracking_code(code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no delivery with tracking code {code}")))
}

pub async fn assign_driver(
    state: &AppState,
    delivery_id: Uuid,
    driver_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let result = assign_driver_inner(state, delivery_id, driver_id, actor, now).await;
    record_outcome(state, Transition::Assign, &result);
    result
}

async fn assign_driver_inner(
    state: &AppState,
    delivery_id: Uuid,
    driver_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let delivery = load_delivery(state, delivery_id).await?;
    match actor {
        Actor::Staff { .. } => authorize(actor, &delivery)?,
        Actor::Driver { driver_id: caller } if *caller == driver_id => {}
        Actor::Driver { driver_id: caller } => {
            return Err(AppError::Unauthorized(format!(
                "driver {caller} can only assign deliveries to themselves"
            )));
        }
    }
    if transitions::next_status(delivery.status, Transition::Assign).is_none() {
        return Err(transitions::refused(&delivery, Transition::Assign));
    }

    let driver = load_driver(state, driver_id).await?;
    if !driver.is_available {
        return Err(AppError::NotFound(format!(
            "driver {driver_id} is not available for dispatch"
        )));
    }

    // Reserve the driver first so two deliveries cannot claim the same driver.
    mutate_driver(state, driver_id, |driver| {
        if !driver.is_available {
            return Err(AppError::NotFound(format!(
                "driver {driver_id} is not available for dispatch"
            )));
        }
        driver.set_shift(ShiftStatus::OnDelivery, now);
        Ok(())
    })
    .await?;

    let assigned = mutate_delivery(state, delivery_id, |delivery| {
        let input = TransitionInput {
            driver_id: Some(driver_id),
            ..Default::default()
        };
        transitions::apply(delivery, Transition::Assign, input, now)
    })
    .await;

    match assigned {
        Ok((delivery, _)) => {
            info!(delivery_id = %delivery.id, driver_id = %driver_id, "driver assigned");
            Ok(delivery)
        }
        Err(err) => {
            release_driver(state, driver_id, now, |_| {}).await;
            Err(err)
        }
    }
}

pub async fn accept(
    state: &AppState,
    delivery_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let result = mutate_delivery(state, delivery_id, |delivery| {
        authorize_assigned_driver(actor, delivery)?;
        transitions::apply(delivery, Transition::Accept, TransitionInput::default(), now)
    })
    .await
    .map(|(delivery, _)| delivery);
    record_outcome(state, Transition::Accept, &result);

    let delivery = result?;
    info!(delivery_id = %delivery.id, actor = %actor, "delivery accepted");
    start_tracking(state, &delivery, now).await;
    Ok(delivery)
}

pub async fn reject(
    state: &AppState,
    delivery_id: Uuid,
    actor: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let result = mutate_delivery(state, delivery_id, |delivery| {
        let driver_id = authorize_assigned_driver(actor, delivery)?;
        let was_tracked = delivery.status == DeliveryStatus::Accepted;
        transitions::apply(delivery, Transition::Reject, TransitionInput::note(reason.clone()), now)?;
        Ok((driver_id, was_tracked))
    })
    .await;
    record_outcome(state, Transition::Reject, &result);

    let (delivery, (driver_id, was_tracked)) = result?;
    info!(delivery_id = %delivery.id, driver_id = %driver_id, "assignment rejected; delivery back in pool");

    release_driver(state, driver_id, now, |_| {}).await;
    if was_tracked {
        stop_tracking(state, &delivery, Some(driver_id), now).await;
    }
    Ok(delivery)
}

/// Generic forward move along the driver milestones (picked up, in transit,
/// arrived, delivered).
pub async fn update_status(
    state: &AppState,
    delivery_id: Uuid,
    target: DeliveryStatus,
    actor: &Actor,
    note: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let Some(transition) = transitions::transition_to(target) else {
        return Err(AppError::Conflict(format!(
            "status {target} cannot be set directly on delivery {delivery_id}"
        )));
    };

    let result = mutate_delivery(state, delivery_id, |delivery| {
        authorize(actor, delivery)?;
        if transitions::next_status(delivery.status, transition).is_none() {
            return Err(AppError::Conflict(format!(
                "delivery {}: status {} -> {target} is not allowed",
                delivery.id, delivery.status
            )));
        }
        transitions::apply(delivery, transition, TransitionInput::note(note.clone()), now)
    })
    .await
    .map(|(delivery, _)| delivery);
    record_outcome(state, transition, &result);

    let delivery = result?;
    info!(delivery_id = %delivery.id, status = %delivery.status, "delivery status updated");

    if delivery.status == DeliveryStatus::Delivered {
        finish_delivery(state, &delivery, now).await;
    }
    Ok(delivery)
}

pub async fn complete(
    state: &AppState,
    delivery_id: Uuid,
    actor: &Actor,
    proof: ProofOfDelivery,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let result = mutate_delivery(state, delivery_id, |delivery| {
        authorize(actor, delivery)?;
        let input = TransitionInput {
            proof: Some(proof.clone()),
            ..Default::default()
        };
        transitions::apply(delivery, Transition::Complete, input, now)
    })
    .await
    .map(|(delivery, _)| delivery);
    record_outcome(state, Transition::Complete, &result);

    let delivery = result?;
    info!(delivery_id = %delivery.id, "delivery completed with proof");
    finish_delivery(state, &delivery, now).await;
    Ok(delivery)
}

pub async fn cancel(
    state: &AppState,
    delivery_id: Uuid,
    actor: &Actor,
    reason: String,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    let result = mutate_delivery(state, delivery_id, |delivery| {
        authorize(actor, delivery)?;
        let previous_driver = delivery.driver_id;
        let was_tracked = DeliveryStatus::TRACKED.contains(&delivery.status)
            || delivery.status == DeliveryStatus::Arrived;
        transitions::apply(delivery, Transition::Cancel, TransitionInput::note(Some(reason.clone())), now)?;
        Ok((previous_driver, was_tracked))
    })
    .await;
    record_outcome(state, Transition::Cancel, &result);

    let (delivery, (previous_driver, was_tracked)) = result?;
    state.metrics.active_deliveries.dec();
    info!(delivery_id = %delivery.id, reason = %reason, "delivery cancelled");

    if let Some(driver_id) = previous_driver {
        release_driver(state, driver_id, now, |stats| {
            stats.total_deliveries += 1;
            stats.cancelled_deliveries += 1;
        })
        .await;
        if was_tracked {
            stop_tracking(state, &delivery, Some(driver_id), now).await;
        }
    }
    Ok(delivery)
}

pub async fn rate(
    state: &AppState,
    delivery_id: Uuid,
    rating: u8,
    feedback: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::InvalidInput(format!(
            "rating must be between 1 and 5, got {rating}"
        )));
    }

    let (delivery, _) = mutate_delivery(state, delivery_id, |delivery| {
        if delivery.status != DeliveryStatus::Delivered {
            return Err(AppError::Conflict(format!(
                "delivery {} is {} and cannot be rated before it is delivered",
                delivery.id, delivery.status
            )));
        }
        if delivery.customer_rating.is_some() {
            return Err(AppError::Conflict(format!(
                "delivery {} has already been rated",
                delivery.id
            )));
        }
        delivery.customer_rating = Some(rating);
        delivery.customer_feedback = feedback.clone();
        delivery.updated_at = now;
        Ok(())
    })
    .await?;

    if let Some(driver_id) = delivery.driver_id {
        update_driver_stats(state, driver_id, now, |stats| stats.record_rating(rating)).await;
    }
    info!(delivery_id = %delivery.id, rating, "delivery rated");
    Ok(delivery)
}

pub async fn tip(
    state: &AppState,
    delivery_id: Uuid,
    amount: f64,
    now: DateTime<Utc>,
) -> AppResult<Delivery> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::InvalidInput(format!(
            "tip must be a non-negative amount, got {amount}"
        )));
    }

    let (delivery, _) = mutate_delivery(state, delivery_id, |delivery| {
        if delivery.status != DeliveryStatus::Delivered {
            return Err(AppError::Conflict(format!(
                "delivery {} is {} and cannot be tipped before it is delivered",
                delivery.id, delivery.status
            )));
        }
        if delivery.tip_amount.is_some() {
            return Err(AppError::Conflict(format!(
                "delivery {} already has a tip",
                delivery.id
            )));
        }
        delivery.tip_amount = Some(amount);
        delivery.updated_at = now;
        Ok(())
    })
    .await?;

    if let Some(driver_id) = delivery.driver_id {
        update_driver_stats(state, driver_id, now, |stats| stats.total_tips += amount).await;
    }
    info!(delivery_id = %delivery.id, amount, "tip recorded");
    Ok(delivery)
}

pub async fn get_stats(state: &AppState, restaurant_id: Option<Uuid>) -> AppResult<DeliveryStats> {
    let filter = DeliveryFilter {
        restaurant_id,
        ..Default::default()
    };
    let deliveries = state.store.find_deliveries(&filter).await?;

    let mut by_status = BTreeMap::new();
    for delivery in &deliveries {
        *by_status.entry(delivery.status).or_insert(0) += 1;
    }

    let durations: Vec<f64> = deliveries
        .iter()
        .filter_map(|delivery| {
            delivery
                .actual_delivery_time
                .map(|done| (done - delivery.created_at).num_seconds() as f64 / 60.0)
        })
        .collect();
    let ratings: Vec<f64> = deliveries
        .iter()
        .filter_map(|delivery| delivery.customer_rating.map(f64::from))
        .collect();

    Ok(DeliveryStats {
        total: deliveries.len(),
        by_status,
        average_delivery_minutes: mean(&durations),
        average_rating: mean(&ratings),
        total_tips: deliveries.iter().filter_map(|delivery| delivery.tip_amount).sum(),
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

async fn finish_delivery(state: &AppState, delivery: &Delivery, now: DateTime<Utc>) {
    state.metrics.active_deliveries.dec();

    let Some(driver_id) = delivery.driver_id else {
        return;
    };
    let fee = delivery.delivery_fee;
    release_driver(state, driver_id, now, |stats| {
        stats.total_deliveries += 1;
        stats.completed_deliveries += 1;
        stats.total_earnings += fee;
    })
    .await;
    stop_tracking(state, delivery, Some(driver_id), now).await;
}

/// Puts a driver back on shift after their delivery ended. The delivery write
/// already happened, so failures here are logged rather than returned.
async fn release_driver<F>(state: &AppState, driver_id: Uuid, now: DateTime<Utc>, stats: F)
where
    F: Fn(&mut DriverStats) + Send + Sync,
{
    let result = mutate_driver(state, driver_id, |driver| {
        if driver.shift_status == ShiftStatus::OnDelivery {
            driver.set_shift(ShiftStatus::Online, now);
        }
        stats(&mut driver.stats);
        driver.updated_at = now;
        Ok(())
    })
    .await;

    if let Err(err) = result {
        error!(driver_id = %driver_id, error = %err, "failed to release driver");
    }
}

async fn update_driver_stats<F>(state: &AppState, driver_id: Uuid, now: DateTime<Utc>, stats: F)
where
    F: Fn(&mut DriverStats) + Send + Sync,
{
    let result = mutate_driver(state, driver_id, |driver| {
        stats(&mut driver.stats);
        driver.updated_at = now;
        Ok(())
    })
    .await;

    if let Err(err) = result {
        error!(driver_id = %driver_id, error = %err, "failed to update driver stats");
    }
}
