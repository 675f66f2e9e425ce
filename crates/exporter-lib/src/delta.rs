//! Counter increments between consecutive snapshots
//!
//! Runtime counters are cumulative; Prometheus counters only move forward by
//! increments. A container is published from its second snapshot onwards.

use crate::models::{NetworkCounters, RawSnapshot};
use std::collections::BTreeMap;

/// Runtime CPU ticks per exported second
pub const DEFAULT_CPU_TICKS_PER_SECOND: f64 = 10_000_000.0;

/// Increments and gauge values for one container and one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaResult {
    pub cpu_usage_seconds: f64,
    pub cpu_kernel_seconds: f64,
    pub memory_usage_bytes: f64,
    pub memory_working_set_bytes: f64,
    pub fs_read_bytes: f64,
    pub fs_reads: f64,
    pub fs_write_bytes: f64,
    pub fs_writes: f64,
    /// Unix timestamp of the current snapshot
    pub last_seen_seconds: f64,
    /// Only interfaces present in both snapshots
    pub networks: BTreeMap<String, NetworkDelta>,
    /// Counters that went backwards and were clamped to zero
    pub resets: Vec<String>,
}

/// Increments for one network interface
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkDelta {
    pub rx_bytes: f64,
    pub rx_packets: f64,
    pub rx_errors: f64,
    pub rx_dropped: f64,
    pub tx_bytes: f64,
    pub tx_packets: f64,
    pub tx_errors: f64,
    pub tx_dropped: f64,
}

/// Computes per-cycle increments from two snapshots
#[derive(Debug, Clone, Copy)]
pub struct DeltaComputer {
    cpu_ticks_per_second: f64,
}

impl Default for DeltaComputer {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_TICKS_PER_SECOND)
    }
}

/// Collects clamped counters while a result is being built
struct Increments {
    resets: Vec<String>,
}

impl Increments {
    fn of(&mut self, field: impl FnOnce() -> String, previous: u64, current: u64) -> f64 {
        match current.checked_sub(previous) {
            Some(delta) => delta as f64,
            None => {
                self.resets.push(field());
                0.0
            }
        }
    }
}

impl DeltaComputer {
    pub fn new(cpu_ticks_per_second: f64) -> Self {
        Self {
            cpu_ticks_per_second,
        }
    }

    pub fn cpu_ticks_per_second(&self) -> f64 {
        self.cpu_ticks_per_second
    }

    /// Compute the increments to publish.
    ///
    /// Returns `None` when there is no previous snapshot.
    pub fn compute(
        &self,
        previous: Option<&RawSnapshot>,
        current: &RawSnapshot,
    ) -> Option<DeltaResult> {
        let previous = previous?;
        let mut inc = Increments { resets: Vec::new() };

        let cpu_usage_seconds = inc.of(
            || "cpu_total".into(),
            previous.cpu.total,
            current.cpu.total,
        ) / self.cpu_ticks_per_second;
        let cpu_kernel_seconds = inc.of(
            || "cpu_kernel".into(),
            previous.cpu.kernel,
            current.cpu.kernel,
        ) / self.cpu_ticks_per_second;

        let (prev_fs, cur_fs) = (&previous.storage, &current.storage);
        let fs_read_bytes = inc.of(|| "fs_read_bytes".into(), prev_fs.read_bytes, cur_fs.read_bytes);
        let fs_reads = inc.of(|| "fs_reads".into(), prev_fs.reads, cur_fs.reads);
        let fs_write_bytes = inc.of(
            || "fs_write_bytes".into(),
            prev_fs.write_bytes,
            cur_fs.write_bytes,
        );
        let fs_writes = inc.of(|| "fs_writes".into(), prev_fs.writes, cur_fs.writes);

        let networks = current
            .networks
            .iter()
            .filter_map(|(name, cur)| {
                let prev = previous.networks.get(name)?;
                Some((name.clone(), network_delta(&mut inc, name, prev, cur)))
            })
            .collect();

        Some(DeltaResult {
            cpu_usage_seconds,
            cpu_kernel_seconds,
            memory_usage_bytes: current.memory.usage_bytes as f64,
            memory_working_set_bytes: current.memory.working_set_bytes as f64,
            fs_read_bytes,
            fs_reads,
            fs_write_bytes,
            fs_writes,
            last_seen_seconds: current.read_at.timestamp() as f64,
            networks,
            resets: inc.resets,
        })
    }
}

fn network_delta(
    inc: &mut Increments,
    interface: &str,
    prev: &NetworkCounters,
    cur: &NetworkCounters,
) -> NetworkDelta {
    let field = |name: &str| {
        let label = format!("{}.{}", interface, name);
        move || label
    };

    NetworkDelta {
        rx_bytes: inc.of(field("rx_bytes"), prev.rx_bytes, cur.rx_bytes),
        rx_packets: inc.of(field("rx_packets"), prev.rx_packets, cur.rx_packets),
        rx_errors: inc.of(field("rx_errors"), prev.rx_errors, cur.rx_errors),
        rx_dropped: inc.of(field("rx_dropped"), prev.rx_dropped, cur.rx_dropped),
        tx_bytes: inc.of(field("tx_bytes"), prev.tx_bytes, cur.tx_bytes),
        tx_packets: inc.of(field("tx_packets"), prev.tx_packets, cur.tx_packets),
        tx_errors: inc.of(field("tx_errors"), prev.tx_errors, cur.tx_errors),
        tx_dropped: inc.of(field("tx_dropped"), prev.tx_dropped, cur.tx_dropped),
    }
}
