pub mod actor;
pub mod delivery;
pub mod driver;
pub mod order;
pub mod tracking;
