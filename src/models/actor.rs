use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Authenticated principal handed in by the API layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    Driver { driver_id: Uuid },
    Staff { restaurant_id: Uuid },
}

impl Actor {
    pub fn driver(driver_id: Uuid) -> Self {
        Actor::Driver { driver_id }
    }

    pub fn staff(restaurant_id: Uuid) -> Self {
        Actor::Staff { restaurant_id }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Driver { driver_id } => write!(f, "driver:{driver_id}"),
            Actor::Staff { restaurant_id } => write!(f, "staff:{restaurant_id}"),
        }
    }
}

impl FromStr for Actor {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, id) = raw
            .split_once(':')
            .ok_or_else(|| AppError::Unauthenticated(format!("malformed actor: {raw}")))?;
        let id = Uuid::parse_str(id.trim())
            .map_err(|err| AppError::Unauthenticated(format!("malformed actor id: {err}")))?;

        match kind.trim() {
            "driver" => Ok(Actor::driver(id)),
            "staff" => Ok(Actor::staff(id)),
            other => Err(AppError::Unauthenticated(format!(
                "unknown actor kind: {other}, expected driver/staff"
            ))),
        }
    }
}
