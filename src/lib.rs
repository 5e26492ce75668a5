pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod schedule;
pub mod scheduler;
pub mod store;
