use async_trait::async_trait;
use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{DeliveryFilter, DispatchStore, OrderDirectory};
use crate::error::{AppError, AppResult};
use crate::models::delivery::{Delivery, DeliveryStatus, LocationSample};
use crate::models::driver::{Driver, DriverLocation};
use crate::models::order::Order;

/// Process-local store backed by `DashMap`s. Each map entry is locked
/// independently, which gives single-document atomicity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deliveries: DashMap<Uuid, Delivery>,
    deliveries_by_order: DashMap<Uuid, Uuid>,
    tracking_codes: DashMap<String, Uuid>,
    drivers: DashMap<Uuid, Driver>,
    orders: DashMap<Uuid, Order>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an order record. Ids are never reused, so an existing order
    /// keeps its delivery link.
    pub fn insert_order(&self, order: Order) -> AppResult<Order> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "order {} is already registered",
                order.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn insert_delivery(&self, delivery: Delivery) -> AppResult<Delivery> {
        // The order slot stays locked until the delivery is in place.
        match self.deliveries_by_order.entry(delivery.order_id) {
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                let blocking = self
                    .deliveries
                    .get(&current)
                    .filter(|existing| existing.status != DeliveryStatus::Cancelled)
                    .map(|existing| (existing.id, existing.status));

                if let Some((existing_id, status)) = blocking {
                    return Err(AppError::Conflict(format!(
                        "order {} already has delivery {existing_id} ({status})",
                        delivery.order_id
                    )));
                }

                self.deliveries.insert(delivery.id, delivery.clone());
                slot.insert(delivery.id);
            }
            Entry::Vacant(slot) => {
                self.deliveries.insert(delivery.id, delivery.clone());
                slot.insert(delivery.id);
            }
        }

        self.tracking_codes
            .insert(delivery.tracking_code.clone(), delivery.id);
        Ok(delivery)
    }

    async fn get_delivery(&self, id: Uuid) -> AppResult<Option<Delivery>> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_delivery_by_tracking_code(&self, code: &str) -> AppResult<Option<Delivery>> {
        let Some(id) = self.tracking_codes.get(code).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        self.get_delivery(id).await
    }

    async fn find_deliveries(&self, filter: &DeliveryFilter) -> AppResult<Vec<Delivery>> {
        let mut deliveries: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliveries)
    }

    async fn find_driver_delivery(
        &self,
        driver_id: Uuid,
        statuses: &[DeliveryStatus],
    ) -> AppResult<Option<Delivery>> {
        Ok(self
            .deliveries
            .iter()
            .find(|entry| {
                let delivery = entry.value();
                delivery.driver_id == Some(driver_id) && statuses.contains(&delivery.status)
            })
            .map(|entry| entry.value().clone()))
    }

    async fn update_delivery(&self, delivery: Delivery) -> AppResult<Delivery> {
        let mut stored = self
            .deliveries
            .get_mut(&delivery.id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", delivery.id)))?;

        if stored.version != delivery.version {
            return Err(AppError::VersionMismatch {
                expected: delivery.version,
                actual: stored.version,
            });
        }

        let mut next = delivery;
        next.version += 1;
        next.location_history = std::mem::take(&mut stored.location_history);
        *stored = next.clone();

        Ok(next)
    }

    async fn append_location_sample(
        &self,
        delivery_id: Uuid,
        sample: LocationSample,
        min_interval: Duration,
    ) -> AppResult<bool> {
        let mut stored = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if !stored.location_sample_due(sample.recorded_at, min_interval) {
            return Ok(false);
        }

        stored.location_history.push(sample);
        Ok(true)
    }

    async fn insert_driver(&self, driver: Driver) -> AppResult<Driver> {
        match self.drivers.entry(driver.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "driver {} already exists",
                driver.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(driver.clone());
                Ok(driver)
            }
        }
    }

    async fn get_driver(&self, id: Uuid) -> AppResult<Option<Driver>> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_drivers(&self) -> AppResult<Vec<Driver>> {
        Ok(self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_driver(&self, driver: Driver) -> AppResult<Driver> {
        let mut stored = self
            .drivers
            .get_mut(&driver.id)
            .ok_or_else(|| AppError::NotFound(format!("driver {} not found", driver.id)))?;

        if stored.version != driver.version {
            return Err(AppError::VersionMismatch {
                expected: driver.version,
                actual: stored.version,
            });
        }

        let mut next = driver;
        next.version += 1;
        next.current_location = stored.current_location;
        *stored = next.clone();

        Ok(next)
    }

    async fn set_driver_location(
        &self,
        driver_id: Uuid,
        location: DriverLocation,
    ) -> AppResult<()> {
        let mut stored = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        if let Some(current) = stored.current_location {
            if location.updated_at < current.updated_at {
                return Err(AppError::Conflict(format!(
                    "location for driver {driver_id} at {} is older than stored location at {}",
                    location.updated_at, current.updated_at
                )));
            }
        }

        stored.current_location = Some(location);
        Ok(())
    }
}

#[async_trait]
impl OrderDirectory for MemoryStore {
    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn link_delivery(&self, order_id: Uuid, delivery_id: Uuid) -> AppResult<()> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if let Some(current) = order.delivery_id.filter(|current| *current != delivery_id) {
            let live = self
                .deliveries
                .get(&current)
                .map(|existing| existing.status)
                .filter(|status| *status != DeliveryStatus::Cancelled);
            if let Some(status) = live {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is linked to delivery {current} ({status})"
                )));
            }
        }

        order.delivery_id = Some(delivery_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::models::delivery::{Address, Delivery, DeliveryStatus, LocationSample};
    use crate::error::AppError;
    use crate::models::driver::{Driver, DriverLocation, GeoPoint, VehicleType};
    use crate::models::order::{FulfillmentType, Order};
    use crate::store::{DeliveryFilter, DispatchStore, OrderDirectory};

    fn address(lat: f64, lng: f64) -> Address {
        Address {
            street: "Main St 1".to_string(),
            city: None,
            postal_code: None,
            location: GeoPoint { lat, lng },
        }
    }

    fn delivery(order_id: Uuid) -> Delivery {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Delivery {
            id: Uuid::new_v4(),
            order_id,
            restaurant_id: Uuid::from_u128(1),
            pickup: address(52.52, 13.40),
            destination: address(52.53, 13.42),
            status: DeliveryStatus::Pending,
            driver_id: None,
            status_history: Vec::new(),
            location_history: Vec::new(),
            estimated_distance_km: 1.7,
            estimated_duration_minutes: 6,
            delivery_fee: 3.5,
            instructions: None,
            assigned_at: None,
            accepted_at: None,
            picked_up_at: None,
            arrived_at_restaurant_at: None,
            arrived_at_customer_at: None,
            actual_delivery_time: None,
            cancelled_at: None,
            proof_of_delivery: None,
            tracking_code: format!("DLV-{}", Uuid::new_v4().simple()),
            customer_rating: None,
            customer_feedback: None,
            tip_amount: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[tokio::test]
    async fn second_live_delivery_for_order_is_rejected() {
        let store = MemoryStore::new();
        let order_id = Uuid::new_v4();

        let first = store.insert_delivery(delivery(order_id)).await.unwrap();
        assert!(store.insert_delivery(delivery(order_id)).await.is_err());

        let mut cancelled = first.clone();
        cancelled.status = DeliveryStatus::Cancelled;
        store.update_delivery(cancelled).await.unwrap();

        store.insert_delivery(delivery(order_id)).await.unwrap();
        assert_eq!(store.delivery_count(), 2);
    }

    #[tokio::test]
    async fn stale_version_write_is_refused() {
        let store = MemoryStore::new();
        let stored = store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();

        let mut first = stored.clone();
        first.status = DeliveryStatus::Cancelled;
        let written = store.update_delivery(first).await.unwrap();
        assert_eq!(written.version, 1);

        let mut second = stored;
        second.status = DeliveryStatus::Assigned;
        assert!(store.update_delivery(second).await.is_err());

        let current = store.get_delivery(written.id).await.unwrap().unwrap();
        assert_eq!(current.status, DeliveryStatus::Cancelled);
    }

    #[tokio::test]
    async fn full_writes_keep_location_history() {
        let store = MemoryStore::new();
        let stored = store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();

        let sample = LocationSample {
            lat: 52.52,
            lng: 13.40,
            recorded_at: stored.created_at,
            accuracy: None,
        };
        assert!(store
            .append_location_sample(stored.id, sample, Duration::seconds(30))
            .await
            .unwrap());
        assert!(!store
            .append_location_sample(stored.id, sample, Duration::seconds(30))
            .await
            .unwrap());

        let written = store.update_delivery(stored).await.unwrap();
        assert_eq!(written.location_history.len(), 1);
    }

    #[tokio::test]
    async fn filter_by_status_and_driver() {
        let store = MemoryStore::new();
        let driver_id = Uuid::new_v4();

        let mut assigned = delivery(Uuid::new_v4());
        assigned.status = DeliveryStatus::Assigned;
        assigned.driver_id = Some(driver_id);
        store.insert_delivery(assigned).await.unwrap();
        store.insert_delivery(delivery(Uuid::new_v4())).await.unwrap();

        let filter = DeliveryFilter {
            status: Some(DeliveryStatus::Assigned),
            ..Default::default()
        };
        assert_eq!(store.find_deliveries(&filter).await.unwrap().len(), 1);

        let found = store
            .find_driver_delivery(driver_id, &DeliveryStatus::DRIVER_BOUND)
            .await
            .unwrap();
        assert!(found.is_some());
        let tracked = store
            .find_driver_delivery(driver_id, &DeliveryStatus::TRACKED)
            .await
            .unwrap();
        assert!(tracked.is_none());
    }

    #[tokio::test]
    async fn driver_location_cannot_go_backwards() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let driver = store
            .insert_driver(Driver::new("Kim".to_string(), None, VehicleType::Car, None, now))
            .await
            .unwrap();

        let at = |secs| DriverLocation {
            location: GeoPoint { lat: 1.0, lng: 1.0 },
            updated_at: now + Duration::seconds(secs),
        };
        store.set_driver_location(driver.id, at(10)).await.unwrap();
        assert!(store.set_driver_location(driver.id, at(5)).await.is_err());

        let written = store.update_driver(driver).await.unwrap();
        assert_eq!(written.current_location, Some(at(10)));
    }

    fn order() -> Order {
        Order {
            id: Uuid::new_v4(),
            restaurant_id: Uuid::from_u128(1),
            customer_id: Some(Uuid::from_u128(2)),
            fulfillment_type: FulfillmentType::Delivery,
            delivery_id: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn registering_an_order_twice_keeps_its_link() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).unwrap();
        let linked = store.insert_delivery(delivery(order.id)).await.unwrap();
        store.link_delivery(order.id, linked.id).await.unwrap();

        let err = store.insert_order(order.clone()).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_id, Some(linked.id));
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn link_moves_only_past_cancelled_deliveries() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).unwrap();
        let first = store.insert_delivery(delivery(order.id)).await.unwrap();
        store.link_delivery(order.id, first.id).await.unwrap();
        store.link_delivery(order.id, first.id).await.unwrap();

        let err = store
            .link_delivery(order.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_id, Some(first.id));

        let mut cancelled = first.clone();
        cancelled.status = DeliveryStatus::Cancelled;
        store.update_delivery(cancelled).await.unwrap();

        let second = store.insert_delivery(delivery(order.id)).await.unwrap();
        store.link_delivery(order.id, second.id).await.unwrap();
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_id, Some(second.id));
    }
}
