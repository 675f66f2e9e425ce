//! Core data models for the stats exporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container as returned by the runtime's list call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Static container metadata, fetched once per container lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Free-form runtime labels, keys not yet normalized
    pub labels: BTreeMap<String, String>,
    pub limits: ResourceLimits,
}

impl Entity {
    /// First 12 characters of the container id, as shown by `docker ps`
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Truncate a container id to its 12-character short form
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Resource limits; `None` when the runtime reports zero (unlimited)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_quota: Option<f64>,
    pub memory_limit_bytes: Option<u64>,
}

/// Point-in-time resource measurement for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub read_at: DateTime<Utc>,
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub storage: StorageUsage,
    pub networks: BTreeMap<String, NetworkCounters>,
}

/// Cumulative CPU time in runtime ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub total: u64,
    pub kernel: u64,
}

/// Instantaneous memory gauges in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub usage_bytes: u64,
    pub working_set_bytes: u64,
}

/// Cumulative filesystem counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub read_bytes: u64,
    pub reads: u64,
    pub write_bytes: u64,
    pub writes: u64,
}

/// Cumulative counters for one network interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

/// Node-level information from the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Swarm node id, empty when the engine is not part of a swarm
    pub node_id: String,
    pub node_name: String,
    pub cpu_count: u64,
    pub total_memory_bytes: u64,
}
