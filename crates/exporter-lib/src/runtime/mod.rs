//! Container runtime access
//!
//! The reconciliation loop only talks to the runtime through the
//! [`RuntimeClient`] trait. The Docker Engine implementation speaks
//! HTTP over the engine's unix socket and bounds every call with a timeout.

mod docker;

pub use docker::{DockerClient, DEFAULT_DOCKER_SOCKET, DEFAULT_RUNTIME_TIMEOUT};

use crate::error::RuntimeError;
use crate::models::{Entity, EntitySummary, NodeInfo, RawSnapshot};

pub use async_trait::async_trait;

/// Trait for container runtime clients
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// List the containers that are currently running
    async fn list_entities(&self) -> Result<Vec<EntitySummary>, RuntimeError>;

    /// Fetch the static metadata of one container
    async fn inspect(&self, id: &str) -> Result<Entity, RuntimeError>;

    /// Read the stats stream of one container to its end, keeping the last record
    async fn stats(&self, id: &str) -> Result<RawSnapshot, RuntimeError>;

    /// Fetch node-level information
    async fn node_info(&self) -> Result<NodeInfo, RuntimeError>;
}
