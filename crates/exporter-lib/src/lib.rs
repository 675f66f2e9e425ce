//! Container stats exporter library
//!
//! This crate provides the core functionality for:
//! - Polling a container runtime for per-container statistics
//! - Freezing a label schema from the containers present at startup
//! - Turning cumulative runtime counters into monotonic Prometheus counters
//! - Deleting the series of containers that disappear
//! - Health checks and self-telemetry

pub mod delta;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod vectors;

pub use error::{CycleError, ExportError, RuntimeError, SchemaError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use reconcile::{CycleReport, ReconciliationLoop, ReconciliationLoopBuilder};
pub use runtime::{DockerClient, RuntimeClient};
pub use scheduler::Scheduler;
pub use schema::{LabelMode, LabelSchema, LabelSchemaRegistry};
