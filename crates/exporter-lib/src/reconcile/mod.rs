//! One polling cycle: discover, publish, evict
//!
//! The loop owns all mutable exporter state. It is driven from a single
//! task, so none of it needs locking; the HTTP side only reads the
//! prometheus registry, whose collectors synchronize internally.


use crate::delta::DeltaComputer;
use crate::error::{CycleError, Result, RuntimeError};
use crate::health::{components, HealthRegistry};
use crate::models::{EntitySummary, NodeInfo, RawSnapshot};
use crate::observability::{phases, ExporterMetrics, StructuredLogger};
use crate::runtime::RuntimeClient;
use crate::schema::{LabelMode, LabelSchemaRegistry};
use crate::store::SnapshotStore;
use crate::vectors::{ContainerVectors, NodeVectors};
use prometheus::Registry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Containers returned by the list call
    pub live: usize,
    /// Containers inspected for the first time
    pub first_seen: usize,
    /// Containers whose increments were written
    pub published: usize,
    /// Containers skipped because a runtime call failed
    pub skipped: usize,
    pub evicted: usize,
    pub resets: usize,
}

/// Reconciles runtime state with the exported series
pub struct ReconciliationLoop {
    runtime: Arc<dyn RuntimeClient>,
    store: SnapshotStore,
    schema: LabelSchemaRegistry,
    delta: DeltaComputer,
    registry: Registry,
    node_vectors: NodeVectors,
    /// Built when the schema is frozen
    container_vectors: Option<ContainerVectors>,
    /// Last node info successfully fetched
    node: Option<NodeInfo>,
    metrics: ExporterMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl ReconciliationLoop {
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn schema(&self) -> &LabelSchemaRegistry {
        &self.schema
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    pub fn is_frozen(&self) -> bool {
        self.container_vectors.is_some()
    }

    /// Run the first cycle and freeze the label schema from what it found
    pub async fn seed(&mut self) -> Result<CycleReport> {
        let report = self.run_cycle().await?;
        self.freeze_schema().await?;
        Ok(report)
    }

    /// Freeze the schema from the stored containers and build the container vectors
    pub async fn freeze_schema(&mut self) -> Result<()> {
        self.schema.freeze(self.store.entities())?;

        let vectors = ContainerVectors::new(
            &self.registry,
            self.schema.entity_schema()?,
            self.schema.interface_schema()?,
        )?;
        self.container_vectors = Some(vectors);

        self.logger
            .log_schema_frozen(self.store.len(), self.schema.entity_schema()?.names());
        self.health.set_ready(true).await;
        Ok(())
    }

    /// Run one full cycle
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let start = Instant::now();
        let result = self.reconcile().await;

        self.metrics
            .observe_cycle(start.elapsed().as_secs_f64(), result.is_ok());
        self.metrics.set_entities_tracked(self.store.len());

        if let Ok(report) = &result {
            debug!(
                live = report.live,
                first_seen = report.first_seen,
                published = report.published,
                skipped = report.skipped,
                evicted = report.evicted,
                elapsed_ms = start.elapsed().as_millis(),
                "Reconciliation cycle complete"
            );
        }
        result
    }

    async fn reconcile(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let live = self.list_live().await?;
        report.live = live.len();
        self.refresh_node().await?;

        let observed = self.discover(&live, &mut report).await;
        for (id, snapshot) in observed {
            self.publish(&id, snapshot, &mut report)?;
        }

        let live_ids: BTreeSet<String> = live.into_iter().map(|c| c.id).collect();
        self.evict(&live_ids, &mut report)?;

        Ok(report)
    }

    async fn list_live(&mut self) -> Result<Vec<EntitySummary>> {
        match self.runtime.list_entities().await {
            Ok(live) => {
                self.health.set_healthy(components::RUNTIME).await;
                Ok(live)
            }
            Err(e) => {
                self.metrics.inc_errors(phases::LIST);
                self.health
                    .set_degraded(components::RUNTIME, format!("list failed: {}", e))
                    .await;
                Err(CycleError::List(e))
            }
        }
    }

    async fn refresh_node(&mut self) -> Result<()> {
        match self.runtime.node_info().await {
            Ok(node) => {
                self.node_vectors.publish_node(&node)?;
                self.node = Some(node);
            }
            Err(e) => {
                self.metrics.inc_errors(phases::NODE_INFO);
                warn!(error = %e, "Failed to fetch node info, reusing previous");
            }
        }
        Ok(())
    }

    /// Fetch metadata for new containers and a snapshot for every live one
    async fn discover(
        &mut self,
        live: &[EntitySummary],
        report: &mut CycleReport,
    ) -> Vec<(String, RawSnapshot)> {
        let mut observed = Vec::with_capacity(live.len());

        for container in live {
            if !self.store.contains(&container.id) {
                match self.runtime.inspect(&container.id).await {
                    Ok(mut entity) => {
                        entity.id = container.id.clone();
                        self.store.upsert_metadata(entity);
                        report.first_seen += 1;
                    }
                    Err(e) => {
                        self.skip(phases::INSPECT, container, &e);
                        report.skipped += 1;
                        continue;
                    }
                }
            }

            match self.runtime.stats(&container.id).await {
                Ok(snapshot) => observed.push((container.id.clone(), snapshot)),
                Err(e) => {
                    self.skip(phases::STATS, container, &e);
                    report.skipped += 1;
                }
            }
        }

        observed
    }

    fn skip(&self, phase: &str, container: &EntitySummary, err: &RuntimeError) {
        self.metrics.inc_errors(phase);
        warn!(
            container_id = %container.id,
            name = %container.name,
            phase = phase,
            error = %err,
            "Skipping container this cycle"
        );
    }

    /// Write increments for one container and keep its snapshot as the next baseline
    fn publish(
        &mut self,
        id: &str,
        snapshot: RawSnapshot,
        report: &mut CycleReport,
    ) -> Result<()> {
        let Some(entity) = self.store.metadata(id) else {
            return Ok(());
        };

        if let Some(node) = &self.node {
            self.node_vectors.set_host_alive(node, entity)?;
        }

        let mut interfaces = Vec::new();
        if let Some(delta) = self.delta.compute(self.store.previous(id), &snapshot) {
            if let Some(vectors) = &self.container_vectors {
                let labels = self.schema.project(entity)?;
                vectors.publish(&labels, &entity.limits, &delta)?;

                for (interface, net) in &delta.networks {
                    let labels = self.schema.project_interface(entity, interface)?;
                    vectors.publish_interface(&labels, net)?;
                    interfaces.push(interface.clone());
                }
                report.published += 1;
            }

            if !delta.resets.is_empty() {
                self.logger.log_counter_reset(id, &delta.resets);
                self.metrics.add_counter_resets(delta.resets.len());
                report.resets += delta.resets.len();
            }
        }

        self.store.record_interfaces(id, interfaces);
        self.store.set_latest(id, snapshot);
        Ok(())
    }

    /// Delete the series and state of containers missing from the live list
    fn evict(&mut self, live_ids: &BTreeSet<String>, report: &mut CycleReport) -> Result<()> {
        let gone: Vec<String> = self
            .store
            .known_ids()
            .difference(live_ids)
            .cloned()
            .collect();

        for id in gone {
            let Some(evicted) = self.store.evict(&id) else {
                continue;
            };
            let entity = evicted.entity;

            let mut removed = 0;
            if let Some(vectors) = &self.container_vectors {
                removed += vectors.remove(&self.schema.project(&entity)?);

                for interface in &evicted.interfaces {
                    let labels = self.schema.project_interface(&entity, interface)?;
                    removed += vectors.remove_interface(&labels);
                }
            }
            if let Some(node) = &self.node {
                if self.node_vectors.remove_host(node, &entity) {
                    removed += 1;
                }
            }

            self.metrics.inc_evictions();
            self.logger.log_eviction(&id, &entity.name, removed);
            report.evicted += 1;
        }

        Ok(())
    }
}

/// Builder for the reconciliation loop
pub struct ReconciliationLoopBuilder {
    runtime: Option<Arc<dyn RuntimeClient>>,
    label_mode: LabelMode,
    delta: DeltaComputer,
    registry: Option<Registry>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ReconciliationLoopBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            label_mode: LabelMode::Standard,
            delta: DeltaComputer::default(),
            registry: None,
            health: None,
            logger: None,
        }
    }

    /// Set the container runtime client
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeClient>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn label_mode(mut self, mode: LabelMode) -> Self {
        self.label_mode = mode;
        self
    }

    /// Set how many runtime CPU ticks make one exported second
    pub fn cpu_ticks_per_second(mut self, ticks: f64) -> Self {
        self.delta = DeltaComputer::new(ticks);
        self
    }

    /// Registry the vectors are registered in
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> anyhow::Result<ReconciliationLoop> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Runtime client is required"))?;
        if !(self.delta.cpu_ticks_per_second() > 0.0) {
            anyhow::bail!("CPU ticks per second must be positive");
        }

        let registry = self.registry.unwrap_or_default();
        let node_vectors = NodeVectors::new(&registry)?;
        let metrics = ExporterMetrics::new(&registry)?;

        info!(mode = ?self.label_mode, "Reconciliation loop configured");

        Ok(ReconciliationLoop {
            runtime,
            store: SnapshotStore::new(),
            schema: LabelSchemaRegistry::new(self.label_mode),
            delta: self.delta,
            registry,
            node_vectors,
            container_vectors: None,
            node: None,
            metrics,
            health: self.health.unwrap_or_default(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new(String::new())),
        })
    }
}

impl Default for ReconciliationLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
