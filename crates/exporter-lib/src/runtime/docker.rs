//! Docker Engine API client over a unix socket
//!
//! Each call opens a fresh HTTP/1.1 connection to the engine socket with
//! hyper and collects the whole response body.

use super::{async_trait, RuntimeClient};
use crate::error::RuntimeError;
use crate::models::{
    CpuUsage, Entity, EntitySummary, MemoryUsage, NetworkCounters, NodeInfo, RawSnapshot,
    ResourceLimits, StorageUsage,
};
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::{header, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

/// Default location of the Docker Engine socket
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Default upper bound for a single runtime call
pub const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(5);

/// Docker reports `NanoCpus`; dividing by this gives the CFS quota for a 100ms period
const NANO_CPUS_PER_QUOTA_UNIT: f64 = 10_000.0;

/// Docker Engine client
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_RUNTIME_TIMEOUT,
        }
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RuntimeError::Timeout(self.timeout))?
    }

    /// Send a GET request and return the response body
    async fn get(&self, path: &str) -> Result<Bytes, RuntimeError> {
        debug!(path = %path, "Docker API request");

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            RuntimeError::Transport(format!(
                "failed to connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Docker connection closed with error");
            }
        });

        let request = Request::get(path)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| RuntimeError::Transport(format!("invalid request for {}: {}", path, e)))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(path.to_string())),
            s => Err(RuntimeError::Transport(format!(
                "{} returned status {}: {}",
                path,
                s,
                String::from_utf8_lossy(&body).trim()
            ))),
        }
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn list_entities(&self) -> Result<Vec<EntitySummary>, RuntimeError> {
        let body = self.bounded(self.get("/containers/json")).await?;
        let containers: Vec<ContainerSummary> = serde_json::from_slice(&body)?;
        Ok(containers.into_iter().map(EntitySummary::from).collect())
    }

    async fn inspect(&self, id: &str) -> Result<Entity, RuntimeError> {
        let path = format!("/containers/{}/json", id);
        let body = self.bounded(self.get(&path)).await?;
        let inspect: ContainerInspect = serde_json::from_slice(&body)?;
        Ok(inspect.into())
    }

    async fn stats(&self, id: &str) -> Result<RawSnapshot, RuntimeError> {
        let path = format!("/containers/{}/stats?stream=false", id);
        let body = self.bounded(self.get(&path)).await?;
        parse_stats_stream(&body)
    }

    async fn node_info(&self) -> Result<NodeInfo, RuntimeError> {
        let body = self.bounded(self.get("/info")).await?;
        let info: EngineInfo = serde_json::from_slice(&body)?;
        Ok(info.into())
    }
}

/// Decode every stats record in the body and keep the last one
fn parse_stats_stream(body: &[u8]) -> Result<RawSnapshot, RuntimeError> {
    let mut last = None;
    for record in serde_json::Deserializer::from_slice(body).into_iter::<StatsResponse>() {
        last = Some(record?);
    }
    last.map(RawSnapshot::from)
        .ok_or_else(|| RuntimeError::Transport("empty stats stream".into()))
}

// ---------------------------------------------------------------------------
// Docker API response types
// ---------------------------------------------------------------------------

/// Entry of `GET /containers/json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
}

impl From<ContainerSummary> for EntitySummary {
    fn from(c: ContainerSummary) -> Self {
        let name = c
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        Self {
            id: c.id,
            name,
            image: c.image,
        }
    }
}

/// Response of `GET /containers/{id}/json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    host_config: HostConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    #[serde(default)]
    nano_cpus: i64,
    #[serde(default)]
    memory: i64,
}

impl From<ContainerInspect> for Entity {
    fn from(c: ContainerInspect) -> Self {
        let limits = ResourceLimits {
            cpu_quota: (c.host_config.nano_cpus > 0)
                .then(|| c.host_config.nano_cpus as f64 / NANO_CPUS_PER_QUOTA_UNIT),
            memory_limit_bytes: (c.host_config.memory > 0).then(|| c.host_config.memory as u64),
        };
        Self {
            id: c.id,
            name: c.name.trim_start_matches('/').to_string(),
            image: c.config.image,
            labels: c.config.labels.unwrap_or_default(),
            limits,
        }
    }
}

/// One record of `GET /containers/{id}/stats`
#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    read: DateTime<Utc>,
    #[serde(default)]
    cpu_stats: CpuStats,
    #[serde(default)]
    memory_stats: MemoryStats,
    #[serde(default)]
    storage_stats: Option<StorageStats>,
    #[serde(default)]
    blkio_stats: BlkioStats,
    #[serde(default)]
    networks: Option<BTreeMap<String, NetworkStats>>,
}

#[derive(Debug, Default, Deserialize)]
struct CpuStats {
    #[serde(default)]
    cpu_usage: CpuUsageStats,
}

#[derive(Debug, Default, Deserialize)]
struct CpuUsageStats {
    #[serde(default)]
    total_usage: u64,
    #[serde(default)]
    usage_in_kernelmode: u64,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryStats {
    #[serde(default)]
    usage: u64,
    /// Windows only
    #[serde(default)]
    commitbytes: Option<u64>,
    /// Windows only
    #[serde(default)]
    privateworkingset: Option<u64>,
    #[serde(default)]
    stats: Option<BTreeMap<String, u64>>,
}

impl MemoryStats {
    fn to_usage(&self) -> MemoryUsage {
        let usage_bytes = self.commitbytes.unwrap_or(self.usage);
        let working_set_bytes = self.privateworkingset.unwrap_or_else(|| {
            // cgroup v2 reports inactive_file, v1 total_inactive_file
            let inactive = self
                .stats
                .as_ref()
                .and_then(|s| s.get("inactive_file").or_else(|| s.get("total_inactive_file")))
                .copied()
                .unwrap_or(0);
            self.usage.saturating_sub(inactive)
        });
        MemoryUsage {
            usage_bytes,
            working_set_bytes,
        }
    }
}

/// Windows storage counters
#[derive(Debug, Default, Deserialize)]
struct StorageStats {
    #[serde(default)]
    read_count_normalized: u64,
    #[serde(default)]
    read_size_bytes: u64,
    #[serde(default)]
    write_count_normalized: u64,
    #[serde(default)]
    write_size_bytes: u64,
}

/// Linux block I/O counters
#[derive(Debug, Default, Deserialize)]
struct BlkioStats {
    #[serde(default)]
    io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
    #[serde(default)]
    io_serviced_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Deserialize)]
struct BlkioEntry {
    #[serde(default)]
    op: String,
    #[serde(default)]
    value: u64,
}

fn sum_blkio(entries: &[BlkioEntry]) -> (u64, u64) {
    entries
        .iter()
        .fold((0, 0), |(read, write), entry| match entry.op.to_ascii_lowercase().as_str() {
            "read" => (read + entry.value, write),
            "write" => (read, write + entry.value),
            _ => (read, write),
        })
}

impl StatsResponse {
    fn storage_usage(&self) -> StorageUsage {
        let bytes = self.blkio_stats.io_service_bytes_recursive.as_deref();
        let ops = self.blkio_stats.io_serviced_recursive.as_deref();

        match (bytes, ops) {
            (Some(bytes), ops) if !bytes.is_empty() => {
                let (read_bytes, write_bytes) = sum_blkio(bytes);
                let (reads, writes) = ops.map(sum_blkio).unwrap_or((0, 0));
                StorageUsage {
                    read_bytes,
                    reads,
                    write_bytes,
                    writes,
                }
            }
            _ => self
                .storage_stats
                .as_ref()
                .map(|s| StorageUsage {
                    read_bytes: s.read_size_bytes,
                    reads: s.read_count_normalized,
                    write_bytes: s.write_size_bytes,
                    writes: s.write_count_normalized,
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct NetworkStats {
    #[serde(default)]
    rx_bytes: u64,
    #[serde(default)]
    rx_packets: u64,
    #[serde(default)]
    rx_errors: u64,
    #[serde(default)]
    rx_dropped: u64,
    #[serde(default)]
    tx_bytes: u64,
    #[serde(default)]
    tx_packets: u64,
    #[serde(default)]
    tx_errors: u64,
    #[serde(default)]
    tx_dropped: u64,
}

impl From<&NetworkStats> for NetworkCounters {
    fn from(n: &NetworkStats) -> Self {
        Self {
            rx_bytes: n.rx_bytes,
            rx_packets: n.rx_packets,
            rx_errors: n.rx_errors,
            rx_dropped: n.rx_dropped,
            tx_bytes: n.tx_bytes,
            tx_packets: n.tx_packets,
            tx_errors: n.tx_errors,
            tx_dropped: n.tx_dropped,
        }
    }
}

impl From<StatsResponse> for RawSnapshot {
    fn from(s: StatsResponse) -> Self {
        let storage = s.storage_usage();
        let networks = s
            .networks
            .as_ref()
            .map(|nets| {
                nets.iter()
                    .map(|(name, stats)| (name.clone(), NetworkCounters::from(stats)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            read_at: s.read,
            cpu: CpuUsage {
                total: s.cpu_stats.cpu_usage.total_usage,
                kernel: s.cpu_stats.cpu_usage.usage_in_kernelmode,
            },
            memory: s.memory_stats.to_usage(),
            storage,
            networks,
        }
    }
}

/// Response of `GET /info`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EngineInfo {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "NCPU")]
    ncpu: u64,
    #[serde(default)]
    mem_total: u64,
    #[serde(default)]
    swarm: Option<SwarmInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct SwarmInfo {
    #[serde(default, rename = "NodeID")]
    node_id: String,
}

impl From<EngineInfo> for NodeInfo {
    fn from(info: EngineInfo) -> Self {
        Self {
            node_id: info.swarm.map(|s| s.node_id).unwrap_or_default(),
            node_name: info.name,
            cpu_count: info.ncpu,
            total_memory_bytes: info.mem_total,
        }
    }
}
