pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod notify;
pub mod observability;
pub mod state;
pub mod store;
