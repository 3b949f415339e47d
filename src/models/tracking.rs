use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::delivery::{Address, DeliveryStatus};
use crate::models::driver::{DriverCard, GeoPoint};

/// A raw position report from a driver device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

impl LocationFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalKind {
    Restaurant,
    Customer,
}

impl ArrivalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArrivalKind::Restaurant => "restaurant",
            ArrivalKind::Customer => "customer",
        }
    }
}

/// Live position/ETA payload pushed to the customer of a delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingUpdate {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub driver: DriverCard,
    pub location: GeoPoint,
    pub destination: GeoPoint,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub status: DeliveryStatus,
    pub at: DateTime<Utc>,
}

/// Internal events emitted by the tracker and consumed by the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    TrackingStarted {
        delivery_id: Uuid,
        order_id: Uuid,
        tracking_code: String,
        driver: Option<DriverCard>,
        at: DateTime<Utc>,
    },
    LocationUpdated(TrackingUpdate),
    TrackingStopped {
        delivery_id: Uuid,
        order_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    },
}

impl TrackingEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            TrackingEvent::TrackingStarted { order_id, .. } => *order_id,
            TrackingEvent::LocationUpdated(update) => update.order_id,
            TrackingEvent::TrackingStopped { order_id, .. } => *order_id,
        }
    }

    pub fn delivery_id(&self) -> Uuid {
        match self {
            TrackingEvent::TrackingStarted { delivery_id, .. } => *delivery_id,
            TrackingEvent::LocationUpdated(update) => update.delivery_id,
            TrackingEvent::TrackingStopped { delivery_id, .. } => *delivery_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrackingEvent::TrackingStarted { .. } => "tracking_started",
            TrackingEvent::LocationUpdated(_) => "location_updated",
            TrackingEvent::TrackingStopped { .. } => "tracking_stopped",
        }
    }
}

/// Message addressed to one customer's channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerMessage {
    pub customer_id: Uuid,
    pub event: TrackingEvent,
}

/// What the tracker did with one location update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdateOutcome {
    pub driver_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub history_recorded: bool,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub arrival: Option<ArrivalKind>,
}

impl LocationUpdateOutcome {
    pub fn idle(driver_id: Uuid) -> Self {
        Self {
            driver_id,
            delivery_id: None,
            status: None,
            history_recorded: false,
            distance_km: None,
            eta_minutes: None,
            arrival: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingSnapshot {
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub driver: DriverCard,
    pub current_location: GeoPoint,
    pub location_updated_at: DateTime<Utc>,
    pub pickup: Address,
    pub destination: Address,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub is_picked_up: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NoDriverAssigned,
    LocationUnknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "availability", rename_all = "snake_case")]
pub enum TrackingData {
    Live(TrackingSnapshot),
    Unavailable { reason: UnavailableReason },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryEstimate {
    pub prep_minutes: u32,
    pub pickup_minutes: u32,
    pub delivery_minutes: u32,
    pub distance_km: f64,
    pub total_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearbyDriver {
    pub driver: DriverCard,
    pub location: GeoPoint,
    pub distance_km: f64,
    pub is_available: bool,
}
