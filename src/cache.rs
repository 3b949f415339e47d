//! Short-lived driver location cache.
//!
//! Holds the latest reported position per driver so that a burst of tracking
//! reads does not go back to the store. Entries are not durable. Deployments
//! with more than one process plug a shared implementation in behind
//! [`LocationCache`]; every driver id is an independent cell.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CachedLocation {
    pub location: GeoPoint,
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait LocationCache: Send + Sync {
    /// Overwrites the driver's cell. Fails with `Conflict` when the cell already
    /// holds a newer report.
    async fn put(&self, driver_id: Uuid, entry: CachedLocation) -> AppResult<()>;

    /// Returns the entry if it is no older than `max_age` at `now`.
    async fn get_fresh(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> AppResult<Option<CachedLocation>>;

    async fn evict(&self, driver_id: Uuid) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryLocationCache {
    entries: DashMap<Uuid, CachedLocation>,
}

impl MemoryLocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LocationCache for MemoryLocationCache {
    async fn put(&self, driver_id: Uuid, entry: CachedLocation) -> AppResult<()> {
        match self.entries.entry(driver_id) {
            Entry::Occupied(mut occupied) => {
                let cached_at = occupied.get().recorded_at;
                if entry.recorded_at < cached_at {
                    return Err(AppError::Conflict(format!(
                        "location for driver {driver_id} at {} is older than cached report at {cached_at}",
                        entry.recorded_at
                    )));
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(())
    }

    async fn get_fresh(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> AppResult<Option<CachedLocation>> {
        Ok(self
            .entries
            .get(&driver_id)
            .map(|entry| *entry.value())
            .filter(|entry| now - entry.recorded_at <= max_age))
    }

    async fn evict(&self, driver_id: Uuid) -> AppResult<()> {
        self.entries.remove(&driver_id);
        Ok(())
    }
}
