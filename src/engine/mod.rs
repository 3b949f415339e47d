pub mod broadcaster;
pub mod deliveries;
pub mod drivers;
pub mod tracker;
pub mod transitions;
