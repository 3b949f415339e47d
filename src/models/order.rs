use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    Delivery,
    Pickup,
    DineIn,
    RoomService,
}

/// Order record owned by the ordering platform. Only `delivery_id` is written here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub fulfillment_type: FulfillmentType,
    pub delivery_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
