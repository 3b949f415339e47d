//! Persistence seams of the dispatch engine.
//!
//! The engine never assumes a storage technology. Every write to a delivery or
//! driver record is a compare-and-swap on its `version`; the two fields that are
//! owned by the tracker (`Delivery::location_history`, `Driver::current_location`)
//! have dedicated atomic operations and are never overwritten by full-record writes.

pub mod memory;

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::delivery::{Delivery, DeliveryStatus, LocationSample};
use crate::models::driver::{Driver, DriverLocation};
use crate::models::order::Order;

pub use memory::MemoryStore;

/// Query predicate for listing deliveries. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub restaurant_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
}

impl DeliveryFilter {
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.status.is_none_or(|status| delivery.status == status)
            && self
                .restaurant_id
                .is_none_or(|id| delivery.restaurant_id == id)
            && self.driver_id.is_none_or(|id| delivery.driver_id == Some(id))
    }
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Inserts a new delivery. Fails with `Conflict` if the order already has a
    /// delivery that was not cancelled; the check and the insert are atomic.
    async fn insert_delivery(&self, delivery: Delivery) -> AppResult<Delivery>;

    async fn get_delivery(&self, id: Uuid) -> AppResult<Option<Delivery>>;

    async fn find_delivery_by_tracking_code(&self, code: &str) -> AppResult<Option<Delivery>>;

    async fn find_deliveries(&self, filter: &DeliveryFilter) -> AppResult<Vec<Delivery>>;

    /// The driver's delivery whose status is one of `statuses`, if any.
    async fn find_driver_delivery(
        &self,
        driver_id: Uuid,
        statuses: &[DeliveryStatus],
    ) -> AppResult<Option<Delivery>>;

    /// Replaces the record if its stored version equals `delivery.version`.
    /// Returns the stored record with the bumped version. `location_history`
    /// of the stored record is kept.
    async fn update_delivery(&self, delivery: Delivery) -> AppResult<Delivery>;

    /// Appends a sample unless the last one is younger than `min_interval`.
    /// Returns whether the sample was stored.
    async fn append_location_sample(
        &self,
        delivery_id: Uuid,
        sample: LocationSample,
        min_interval: Duration,
    ) -> AppResult<bool>;

    async fn insert_driver(&self, driver: Driver) -> AppResult<Driver>;

    async fn get_driver(&self, id: Uuid) -> AppResult<Option<Driver>>;

    async fn list_drivers(&self) -> AppResult<Vec<Driver>>;

    /// Compare-and-swap on `driver.version`. `current_location` of the stored
    /// record is kept.
    async fn update_driver(&self, driver: Driver) -> AppResult<Driver>;

    /// Writes the driver's persisted location. Fails with `Conflict` when the
    /// stored location is newer.
    async fn set_driver_location(&self, driver_id: Uuid, location: DriverLocation)
        -> AppResult<()>;
}

/// Read access to the ordering platform's orders.
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>>;

    /// Points the order at the delivery created for it.
    async fn link_delivery(&self, order_id: Uuid, delivery_id: Uuid) -> AppResult<()>;
}
