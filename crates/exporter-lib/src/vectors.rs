//! Exported container and node metric vectors
//!
//! Every vector is registered exactly once in the exporter's own
//! [`Registry`]. Container vectors can only be built after the label schema
//! is frozen because their label names are fixed at construction.

use crate::delta::{DeltaResult, NetworkDelta};
use crate::error::ExportError;
use crate::models::{Entity, NodeInfo, ResourceLimits};
use crate::schema::{LabelSchema, LabelSchemaRegistry, LabelSet};
use prometheus::core::{Collector, MetricVec, MetricVecBuilder};
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use std::collections::HashMap;

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, ExportError> {
    let vec = CounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, ExportError> {
    let vec = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn as_labels(labels: &LabelSet) -> HashMap<&str, &str> {
    labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn metric_name<C: Collector>(collector: &C) -> String {
    collector
        .desc()
        .first()
        .map(|d| d.fq_name.clone())
        .unwrap_or_default()
}

fn add(vec: &CounterVec, labels: &HashMap<&str, &str>, value: f64) -> Result<(), ExportError> {
    let counter = vec
        .get_metric_with(labels)
        .map_err(|source| ExportError::LabelMismatch {
            metric: metric_name(vec),
            source,
        })?;
    counter.inc_by(value.max(0.0));
    Ok(())
}

fn set(vec: &GaugeVec, labels: &HashMap<&str, &str>, value: f64) -> Result<(), ExportError> {
    let gauge = vec
        .get_metric_with(labels)
        .map_err(|source| ExportError::LabelMismatch {
            metric: metric_name(vec),
            source,
        })?;
    gauge.set(value);
    Ok(())
}

/// Remove one series; absent series are not an error
fn remove<T: MetricVecBuilder>(vec: &MetricVec<T>, labels: &HashMap<&str, &str>) -> bool {
    vec.remove(labels).is_ok()
}

/// Per-container and per-container+interface vectors
pub struct ContainerVectors {
    last_seen: GaugeVec,
    cpu_usage_seconds: CounterVec,
    cpu_system_seconds: CounterVec,
    cpu_quota: GaugeVec,
    memory_usage_bytes: GaugeVec,
    memory_working_set_bytes: GaugeVec,
    memory_limit_bytes: GaugeVec,
    fs_reads_bytes: CounterVec,
    fs_reads: CounterVec,
    fs_writes_bytes: CounterVec,
    fs_writes: CounterVec,
    net_receive_bytes: CounterVec,
    net_receive_errors: CounterVec,
    net_receive_dropped: CounterVec,
    net_receive_packets: CounterVec,
    net_transmit_bytes: CounterVec,
    net_transmit_errors: CounterVec,
    net_transmit_dropped: CounterVec,
    net_transmit_packets: CounterVec,
}

impl ContainerVectors {
    /// Create and register every container vector
    pub fn new(
        registry: &Registry,
        entity: &LabelSchema,
        interface: &LabelSchema,
    ) -> Result<Self, ExportError> {
        let labels = entity.as_strs();
        let net = interface.as_strs();

        Ok(Self {
            last_seen: gauge_vec(
                registry,
                "container_last_seen",
                "Last time a container was seen by the exporter.",
                &labels,
            )?,
            cpu_usage_seconds: counter_vec(
                registry,
                "container_cpu_usage_seconds_total",
                "Cumulative cpu time consumed in seconds.",
                &labels,
            )?,
            cpu_system_seconds: counter_vec(
                registry,
                "container_cpu_system_seconds_total",
                "Cumulative system cpu time consumed in seconds.",
                &labels,
            )?,
            cpu_quota: gauge_vec(
                registry,
                "container_spec_cpu_quota",
                "CPU quota of the container.",
                &labels,
            )?,
            memory_usage_bytes: gauge_vec(
                registry,
                "container_memory_usage_bytes",
                "Current memory usage in bytes, including all memory regardless of when it was accessed.",
                &labels,
            )?,
            memory_working_set_bytes: gauge_vec(
                registry,
                "container_memory_working_set_bytes",
                "Current working set in bytes.",
                &labels,
            )?,
            memory_limit_bytes: gauge_vec(
                registry,
                "container_spec_memory_limit_bytes",
                "Memory limit for the container.",
                &labels,
            )?,
            fs_reads_bytes: counter_vec(
                registry,
                "container_fs_reads_bytes_total",
                "Cumulative count of bytes read.",
                &labels,
            )?,
            fs_reads: counter_vec(
                registry,
                "container_fs_reads_total",
                "Cumulative count of reads completed.",
                &labels,
            )?,
            fs_writes_bytes: counter_vec(
                registry,
                "container_fs_writes_bytes_total",
                "Cumulative count of bytes written.",
                &labels,
            )?,
            fs_writes: counter_vec(
                registry,
                "container_fs_writes_total",
                "Cumulative count of writes completed.",
                &labels,
            )?,
            net_receive_bytes: counter_vec(
                registry,
                "container_network_receive_bytes_total",
                "Cumulative count of bytes received.",
                &net,
            )?,
            net_receive_errors: counter_vec(
                registry,
                "container_network_receive_errors_total",
                "Cumulative count of errors encountered while receiving.",
                &net,
            )?,
            net_receive_dropped: counter_vec(
                registry,
                "container_network_receive_packets_dropped_total",
                "Cumulative count of packets dropped while receiving.",
                &net,
            )?,
            net_receive_packets: counter_vec(
                registry,
                "container_network_receive_packets_total",
                "Cumulative count of packets received.",
                &net,
            )?,
            net_transmit_bytes: counter_vec(
                registry,
                "container_network_transmit_bytes_total",
                "Cumulative count of bytes transmitted.",
                &net,
            )?,
            net_transmit_errors: counter_vec(
                registry,
                "container_network_transmit_errors_total",
                "Cumulative count of errors encountered while transmitting.",
                &net,
            )?,
            net_transmit_dropped: counter_vec(
                registry,
                "container_network_transmit_packets_dropped_total",
                "Cumulative count of packets dropped while transmitting.",
                &net,
            )?,
            net_transmit_packets: counter_vec(
                registry,
                "container_network_transmit_packets_total",
                "Cumulative count of packets transmitted.",
                &net,
            )?,
        })
    }

    /// Write the per-container increments and gauges
    pub fn publish(
        &self,
        labels: &LabelSet,
        limits: &ResourceLimits,
        delta: &DeltaResult,
    ) -> Result<(), ExportError> {
        let labels = as_labels(labels);

        add(&self.cpu_usage_seconds, &labels, delta.cpu_usage_seconds)?;
        add(&self.cpu_system_seconds, &labels, delta.cpu_kernel_seconds)?;
        if let Some(quota) = limits.cpu_quota {
            set(&self.cpu_quota, &labels, quota)?;
        }

        set(&self.last_seen, &labels, delta.last_seen_seconds)?;

        set(&self.memory_usage_bytes, &labels, delta.memory_usage_bytes)?;
        set(
            &self.memory_working_set_bytes,
            &labels,
            delta.memory_working_set_bytes,
        )?;
        if let Some(limit) = limits.memory_limit_bytes {
            set(&self.memory_limit_bytes, &labels, limit as f64)?;
        }

        add(&self.fs_reads_bytes, &labels, delta.fs_read_bytes)?;
        add(&self.fs_reads, &labels, delta.fs_reads)?;
        add(&self.fs_writes_bytes, &labels, delta.fs_write_bytes)?;
        add(&self.fs_writes, &labels, delta.fs_writes)?;

        Ok(())
    }

    /// Write the increments of one network interface
    pub fn publish_interface(
        &self,
        labels: &LabelSet,
        delta: &NetworkDelta,
    ) -> Result<(), ExportError> {
        let labels = as_labels(labels);

        add(&self.net_receive_bytes, &labels, delta.rx_bytes)?;
        add(&self.net_receive_errors, &labels, delta.rx_errors)?;
        add(&self.net_receive_dropped, &labels, delta.rx_dropped)?;
        add(&self.net_receive_packets, &labels, delta.rx_packets)?;
        add(&self.net_transmit_bytes, &labels, delta.tx_bytes)?;
        add(&self.net_transmit_errors, &labels, delta.tx_errors)?;
        add(&self.net_transmit_dropped, &labels, delta.tx_dropped)?;
        add(&self.net_transmit_packets, &labels, delta.tx_packets)?;

        Ok(())
    }

    /// Delete every per-container series with these labels, returning how many existed
    pub fn remove(&self, labels: &LabelSet) -> usize {
        let labels = as_labels(labels);
        let gauges = [
            &self.last_seen,
            &self.cpu_quota,
            &self.memory_usage_bytes,
            &self.memory_working_set_bytes,
            &self.memory_limit_bytes,
        ];
        let counters = [
            &self.cpu_usage_seconds,
            &self.cpu_system_seconds,
            &self.fs_reads_bytes,
            &self.fs_reads,
            &self.fs_writes_bytes,
            &self.fs_writes,
        ];

        gauges.iter().filter(|v| remove(**v, &labels)).count()
            + counters.iter().filter(|v| remove(**v, &labels)).count()
    }

    /// Delete every per-interface series with these labels, returning how many existed
    pub fn remove_interface(&self, labels: &LabelSet) -> usize {
        let labels = as_labels(labels);
        [
            &self.net_receive_bytes,
            &self.net_receive_errors,
            &self.net_receive_dropped,
            &self.net_receive_packets,
            &self.net_transmit_bytes,
            &self.net_transmit_errors,
            &self.net_transmit_dropped,
            &self.net_transmit_packets,
        ]
        .iter()
        .filter(|v| remove(**v, &labels))
        .count()
    }
}

/// Node-level vectors and per-container host liveness
pub struct NodeVectors {
    node_meta: GaugeVec,
    machine_cpu_cores: GaugeVec,
    machine_memory_bytes: GaugeVec,
    host_meta: GaugeVec,
}

impl NodeVectors {
    pub fn new(registry: &Registry) -> Result<Self, ExportError> {
        let node = LabelSchemaRegistry::node_schema();
        let node = node.as_strs();
        let host = LabelSchemaRegistry::host_schema();
        let host = host.as_strs();

        Ok(Self {
            node_meta: gauge_vec(
                registry,
                "node_meta",
                "Meta information on docker swarm nodes.",
                &node,
            )?,
            machine_cpu_cores: gauge_vec(
                registry,
                "machine_cpu_cores",
                "Number of CPU cores on the machine.",
                &node,
            )?,
            machine_memory_bytes: gauge_vec(
                registry,
                "machine_memory_bytes",
                "Amount of memory installed on the machine.",
                &node,
            )?,
            host_meta: gauge_vec(
                registry,
                "host_meta",
                "Meta information on docker swarm container hosts.",
                &host,
            )?,
        })
    }

    pub fn publish_node(&self, node: &NodeInfo) -> Result<(), ExportError> {
        let labels = LabelSchemaRegistry::node_labels(node);
        let labels = as_labels(&labels);

        set(&self.node_meta, &labels, 1.0)?;
        set(&self.machine_cpu_cores, &labels, node.cpu_count as f64)?;
        set(&self.machine_memory_bytes, &labels, node.total_memory_bytes as f64)?;
        Ok(())
    }

    /// Mark a container as alive on this node
    pub fn set_host_alive(&self, node: &NodeInfo, entity: &Entity) -> Result<(), ExportError> {
        let labels = LabelSchemaRegistry::host_labels(node, entity);
        set(&self.host_meta, &as_labels(&labels), 1.0)
    }

    pub fn remove_host(&self, node: &NodeInfo, entity: &Entity) -> bool {
        let labels = LabelSchemaRegistry::host_labels(node, entity);
        remove(&self.host_meta, &as_labels(&labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LabelMode;
    use std::collections::BTreeMap;

    fn frozen_registry(entity: &Entity) -> LabelSchemaRegistry {
        let mut schema = LabelSchemaRegistry::new(LabelMode::Standard);
        schema.freeze([entity]).unwrap();
        schema
    }

    fn entity() -> Entity {
        Entity {
            id: "0123456789abcdef".into(),
            name: "web".into(),
            image: "nginx".into(),
            labels: BTreeMap::from([("env".to_string(), "prod".to_string())]),
            limits: ResourceLimits {
                cpu_quota: Some(50000.0),
                memory_limit_bytes: None,
            },
        }
    }

    fn delta() -> DeltaResult {
        DeltaResult {
            cpu_usage_seconds: 5.0,
            cpu_kernel_seconds: 1.0,
            memory_usage_bytes: 100.0,
            memory_working_set_bytes: 80.0,
            fs_read_bytes: 10.0,
            fs_reads: 1.0,
            fs_write_bytes: 20.0,
            fs_writes: 2.0,
            last_seen_seconds: 1_700_000_000.0,
            networks: BTreeMap::new(),
            resets: Vec::new(),
        }
    }

    fn value(registry: &Registry, name: &str) -> Option<f64> {
        registry
            .gather()
            .iter()
            .find(|family| family.get_name() == name)
            .and_then(|family| family.get_metric().first().cloned())
            .map(|m| {
                if m.has_counter() {
                    m.get_counter().get_value()
                } else {
                    m.get_gauge().get_value()
                }
            })
    }

    #[test]
    fn test_publish_and_remove_container() {
        let registry = Registry::new();
        let e = entity();
        let schema = frozen_registry(&e);
        let vectors = ContainerVectors::new(
            &registry,
            schema.entity_schema().unwrap(),
            schema.interface_schema().unwrap(),
        )
        .unwrap();

        let labels = schema.project(&e).unwrap();
        vectors.publish(&labels, &e.limits, &delta()).unwrap();
        vectors.publish(&labels, &e.limits, &delta()).unwrap();

        assert_eq!(value(&registry, "container_cpu_usage_seconds_total"), Some(10.0));
        assert_eq!(value(&registry, "container_memory_usage_bytes"), Some(100.0));
        assert_eq!(value(&registry, "container_spec_cpu_quota"), Some(50000.0));
        // No memory limit, no series
        assert_eq!(value(&registry, "container_spec_memory_limit_bytes"), None);

        // 4 gauges (no memory limit) + 6 counters
        assert_eq!(vectors.remove(&labels), 10);
        assert_eq!(value(&registry, "container_cpu_usage_seconds_total"), None);
        assert_eq!(vectors.remove(&labels), 0);
    }

    #[test]
    fn test_partial_label_set_is_rejected() {
        let registry = Registry::new();
        let e = entity();
        let schema = frozen_registry(&e);
        let vectors = ContainerVectors::new(
            &registry,
            schema.entity_schema().unwrap(),
            schema.interface_schema().unwrap(),
        )
        .unwrap();

        let mut labels = schema.project(&e).unwrap();
        labels.remove("container_label_env");

        let result = vectors.publish(&labels, &e.limits, &delta());
        assert!(matches!(result, Err(ExportError::LabelMismatch { .. })));
    }

    #[test]
    fn test_interface_series_lifecycle() {
        let registry = Registry::new();
        let e = entity();
        let schema = frozen_registry(&e);
        let vectors = ContainerVectors::new(
            &registry,
            schema.entity_schema().unwrap(),
            schema.interface_schema().unwrap(),
        )
        .unwrap();

        let labels = schema.project_interface(&e, "eth0").unwrap();
        let net = NetworkDelta {
            rx_bytes: 42.0,
            ..Default::default()
        };
        vectors.publish_interface(&labels, &net).unwrap();

        assert_eq!(
            value(&registry, "container_network_receive_bytes_total"),
            Some(42.0)
        );
        assert_eq!(vectors.remove_interface(&labels), 8);
    }

    #[test]
    fn test_node_vectors() {
        let registry = Registry::new();
        let vectors = NodeVectors::new(&registry).unwrap();
        let node = NodeInfo {
            node_id: "n1".into(),
            node_name: "worker-1".into(),
            cpu_count: 8,
            total_memory_bytes: 1 << 30,
        };

        vectors.publish_node(&node).unwrap();
        vectors.set_host_alive(&node, &entity()).unwrap();

        assert_eq!(value(&registry, "machine_cpu_cores"), Some(8.0));
        assert_eq!(value(&registry, "host_meta"), Some(1.0));

        assert!(vectors.remove_host(&node, &entity()));
        assert_eq!(value(&registry, "host_meta"), None);
    }

    #[test]
    fn test_vectors_register_once() {
        let registry = Registry::new();
        NodeVectors::new(&registry).unwrap();
        assert!(matches!(
            NodeVectors::new(&registry),
            Err(ExportError::Registration(_))
        ));
    }
}
