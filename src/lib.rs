pub mod config;
pub mod contract;
pub mod controller;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod snapshot;
pub mod store;
pub mod wal;
