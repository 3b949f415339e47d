use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::actor::Actor;
use crate::models::delivery::DeliveryStatus;
use crate::models::driver::{Driver, DriverStatus, ShiftStatus, VehicleType};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDriver {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub vehicle_plate: Option<String>,
}

pub async fn load_driver(state: &AppState, id: Uuid) -> AppResult<Driver> {
    state
        .store
        .get_driver(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))
}

/// Compare-and-swap counterpart of `mutate_delivery` for driver records.
pub async fn mutate_driver<T, F>(state: &AppState, id: Uuid, mut change: F) -> AppResult<(Driver, T)>
where
    F: FnMut(&mut Driver) -> AppResult<T> + Send,
    T: Send,
{
    let mut attempt = 1;
    loop {
        let mut driver = load_driver(state, id).await?;
        let outcome = change(&mut driver)?;

        match state.store.update_driver(driver).await {
            Ok(written) => return Ok((written, outcome)),
            Err(AppError::VersionMismatch { expected, actual })
                if attempt < state.settings.write_retries =>
            {
                debug!(driver_id = %id, expected, actual, attempt, "driver write raced; retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn authorize_self(actor: &Actor, driver_id: Uuid) -> AppResult<()> {
    match actor {
        Actor::Driver { driver_id: caller } if *caller == driver_id => Ok(()),
        _ => Err(AppError::Unauthorized(format!(
            "{actor} cannot change the shift of driver {driver_id}"
        ))),
    }
}

pub async fn register_driver(
    state: &AppState,
    request: RegisterDriver,
    now: DateTime<Utc>,
) -> AppResult<Driver> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("name cannot be empty".to_string()));
    }

    let driver = Driver::new(
        name.to_string(),
        request.phone,
        request.vehicle_type,
        request.vehicle_plate,
        now,
    );
    let driver = state.store.insert_driver(driver).await?;

    info!(driver_id = %driver.id, vehicle = ?driver.vehicle_type, "driver registered");
    Ok(driver)
}

pub async fn list_drivers(state: &AppState) -> AppResult<Vec<Driver>> {
    let mut drivers = state.store.list_drivers().await?;
    drivers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(drivers)
}

pub async fn verify_driver(
    state: &AppState,
    driver_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Driver> {
    if !matches!(actor, Actor::Staff { .. }) {
        return Err(AppError::Unauthorized(
            "only staff can verify drivers".to_string(),
        ));
    }

    let (driver, _) = mutate_driver(state, driver_id, |driver| {
        if driver.status == DriverStatus::Suspended {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is suspended"
            )));
        }
        driver.status = DriverStatus::Verified;
        driver.updated_at = now;
        driver.refresh_availability();
        Ok(())
    })
    .await?;

    info!(driver_id = %driver.id, "driver verified");
    Ok(driver)
}

pub async fn go_online(
    state: &AppState,
    driver_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Driver> {
    authorize_self(actor, driver_id)?;

    let (driver, _) = mutate_driver(state, driver_id, |driver| {
        if driver.status != DriverStatus::Verified {
            return Err(AppError::Unauthorized(format!(
                "driver {driver_id} is not verified"
            )));
        }
        if driver.shift_status == ShiftStatus::OnDelivery {
            return Ok(());
        }
        driver.set_shift(ShiftStatus::Online, now);
        Ok(())
    })
    .await?;

    info!(driver_id = %driver.id, shift = ?driver.shift_status, "driver online");
    Ok(driver)
}

pub async fn go_offline(
    state: &AppState,
    driver_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Driver> {
    authorize_self(actor, driver_id)?;

    // Always the durable store: the location cache says nothing about deliveries.
    if let Some(active) = state
        .store
        .find_driver_delivery(driver_id, &DeliveryStatus::DRIVER_BOUND)
        .await?
    {
        return Err(AppError::Unauthorized(format!(
            "driver {driver_id} cannot go offline with active delivery {} ({})",
            active.id, active.status
        )));
    }

    // A reservation made by a concurrent assign is visible on the driver before
    // the delivery write lands.
    let (driver, _) = mutate_driver(state, driver_id, |driver| {
        if driver.shift_status == ShiftStatus::OnDelivery {
            return Err(AppError::Unauthorized(format!(
                "driver {driver_id} is reserved for a delivery and cannot go offline"
            )));
        }
        driver.set_shift(ShiftStatus::Offline, now);
        Ok(())
    })
    .await?;

    info!(driver_id = %driver.id, "driver offline");
    Ok(driver)
}
