use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bicycle,
    Scooter,
    Motorcycle,
    Car,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    PendingVerification,
    Verified,
    Suspended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Offline,
    Online,
    OnDelivery,
}

/// Last known position of a driver as persisted on the driver record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DriverLocation {
    pub location: GeoPoint,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriverStats {
    pub total_deliveries: u32,
    pub completed_deliveries: u32,
    pub cancelled_deliveries: u32,
    pub rating: f64,
    pub rating_count: u32,
    pub total_earnings: f64,
    pub total_tips: f64,
}

impl DriverStats {
    pub fn record_rating(&mut self, rating: u8) {
        let total = self.rating * self.rating_count as f64 + rating as f64;
        self.rating_count += 1;
        self.rating = total / self.rating_count as f64;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle_type: VehicleType,
    pub vehicle_plate: Option<String>,
    pub status: DriverStatus,
    pub shift_status: ShiftStatus,
    pub is_available: bool,
    pub current_location: Option<DriverLocation>,
    pub stats: DriverStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Driver {
    pub fn new(
        name: String,
        phone: Option<String>,
        vehicle_type: VehicleType,
        vehicle_plate: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            phone,
            vehicle_type,
            vehicle_plate,
            status: DriverStatus::PendingVerification,
            shift_status: ShiftStatus::Offline,
            is_available: false,
            current_location: None,
            stats: DriverStats::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Recomputes `is_available` after `status` or `shift_status` changed.
    pub fn refresh_availability(&mut self) {
        self.is_available =
            self.status == DriverStatus::Verified && self.shift_status == ShiftStatus::Online;
    }

    pub fn set_shift(&mut self, shift: ShiftStatus, now: DateTime<Utc>) {
        self.shift_status = shift;
        self.updated_at = now;
        self.refresh_availability();
    }

    /// Drivers that show up in proximity searches.
    pub fn is_on_shift(&self) -> bool {
        self.status == DriverStatus::Verified
            && matches!(
                self.shift_status,
                ShiftStatus::Online | ShiftStatus::OnDelivery
            )
    }
}

/// Display fields of a driver that are shared with customers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverCard {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle_type: VehicleType,
    pub vehicle_plate: Option<String>,
    pub rating: f64,
}

impl From<&Driver> for DriverCard {
    fn from(driver: &Driver) -> Self {
        Self {
            id: driver.id,
            name: driver.name.clone(),
            phone: driver.phone.clone(),
            vehicle_type: driver.vehicle_type,
            vehicle_plate: driver.vehicle_plate.clone(),
            rating: driver.stats.rating,
        }
    }
}
