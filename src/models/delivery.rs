use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Arrived,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 8] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Assigned,
        DeliveryStatus::Accepted,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::Arrived,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
    ];

    /// Statuses during which driver location updates feed the delivery.
    pub const TRACKED: [DeliveryStatus; 3] = [
        DeliveryStatus::Accepted,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
    ];

    /// Statuses that keep a driver bound to the delivery.
    pub const DRIVER_BOUND: [DeliveryStatus; 5] = [
        DeliveryStatus::Assigned,
        DeliveryStatus::Accepted,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::Arrived,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    pub fn is_picked_up(self) -> bool {
        matches!(
            self,
            DeliveryStatus::PickedUp | DeliveryStatus::InTransit | DeliveryStatus::Arrived
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Arrived => "arrived",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub street: String,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    Created,
    Assigned,
    Accepted,
    Rejected,
    PickedUp,
    InTransit,
    ArrivedAtRestaurant,
    Arrived,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEntry {
    pub event: DeliveryEvent,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProofOfDelivery {
    pub signature: Option<String>,
    pub photo_url: Option<String>,
    pub recipient_name: Option<String>,
    pub notes: Option<String>,
}

impl ProofOfDelivery {
    pub fn is_present(&self) -> bool {
        let filled = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        filled(&self.signature) || filled(&self.photo_url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub pickup: Address,
    pub destination: Address,
    pub status: DeliveryStatus,
    pub driver_id: Option<Uuid>,
    pub status_history: Vec<StatusEntry>,
    pub location_history: Vec<LocationSample>,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub delivery_fee: f64,
    pub instructions: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub arrived_at_restaurant_at: Option<DateTime<Utc>>,
    pub arrived_at_customer_at: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub proof_of_delivery: Option<ProofOfDelivery>,
    pub tracking_code: String,
    pub customer_rating: Option<u8>,
    pub customer_feedback: Option<String>,
    pub tip_amount: Option<f64>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Delivery {
    pub fn record(&mut self, event: DeliveryEvent, note: Option<String>, at: DateTime<Utc>) {
        self.status_history.push(StatusEntry { event, at, note });
        self.updated_at = at;
    }

    /// Whether a new history sample taken at `at` passes the throttle.
    pub fn location_sample_due(&self, at: DateTime<Utc>, min_interval: Duration) -> bool {
        match self.location_history.last() {
            None => true,
            Some(last) => at - last.recorded_at >= min_interval,
        }
    }

    /// Where the driver is currently heading.
    pub fn current_destination(&self) -> &Address {
        if self.status == DeliveryStatus::Accepted {
            &self.pickup
        } else {
            &self.destination
        }
    }
}

/// Sets a milestone once; later calls leave the first value in place.
pub fn set_once(slot: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(at);
    true
}

/// Unauthenticated view served through the tracking code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicDelivery {
    pub id: Uuid,
    pub tracking_code: String,
    pub status: DeliveryStatus,
    pub destination: Address,
    pub estimated_duration_minutes: u32,
    pub status_history: Vec<StatusEntry>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
}

impl From<&Delivery> for PublicDelivery {
    fn from(delivery: &Delivery) -> Self {
        Self {
            id: delivery.id,
            tracking_code: delivery.tracking_code.clone(),
            status: delivery.status,
            destination: delivery.destination.clone(),
            estimated_duration_minutes: delivery.estimated_duration_minutes,
            status_history: delivery.status_history.clone(),
            actual_delivery_time: delivery.actual_delivery_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{set_once, DeliveryStatus, ProofOfDelivery};

    #[test]
    fn set_once_keeps_first_value() {
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut slot = None;
        assert!(set_once(&mut slot, first));
        assert!(!set_once(&mut slot, first + Duration::minutes(3)));
        assert_eq!(slot, Some(first));
    }

    #[test]
    fn proof_needs_signature_or_photo() {
        let mut proof = ProofOfDelivery {
            recipient_name: Some("Jo".to_string()),
            ..Default::default()
        };
        assert!(!proof.is_present());

        proof.signature = Some("   ".to_string());
        assert!(!proof.is_present());

        proof.photo_url = Some("https://cdn.example/pod.jpg".to_string());
        assert!(proof.is_present());
    }

    #[test]
    fn status_serializes_snake_case() {
        let raw = serde_json::to_string(&DeliveryStatus::PickedUp).unwrap();
        assert_eq!(raw, "\"picked_up\"");
        assert_eq!(DeliveryStatus::InTransit.to_string(), "in_transit");
    }
}
