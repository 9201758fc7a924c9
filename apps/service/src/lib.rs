//! Monitor execution and result aggregation.
//!
//! Periodically probes user-configured HTTP endpoints, classifies every
//! attempt, persists the outcome and answers uptime and latency queries.

pub mod config;
pub mod database;
pub mod monitoring;
pub mod pool;
pub mod store;
pub mod supervisor;
pub mod validation;

pub use supervisor::{MonitorReport, Supervisor, SupervisorError};
