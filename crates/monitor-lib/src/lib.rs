//! Condition-monitoring library for vibration and temperature telemetry
//!
//! This crate provides the core functionality for:
//! - Per-machine hourly/daily rollups of raw readings
//! - Batching resampled readings for anomaly-scoring inference
//! - Dispatching raw sensor events to both pipelines
//! - Storage, archival, health checks and observability

pub mod archive;
pub mod batch;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod inference;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod resample;
pub mod rollup;
pub mod statistics;
pub mod storage;
pub mod worker;

pub use error::{MonitorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
