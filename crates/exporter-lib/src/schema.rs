//! Label schema derivation and projection
//!
//! Prometheus metric vectors fix their label names at construction time and
//! reject any write whose label set differs. Containers, however, carry
//! arbitrary label sets. The registry freezes one schema from the containers
//! present at startup and projects every container onto it: labels outside
//! the schema are dropped, schema labels the container lacks are set to "".

use crate::error::SchemaError;
use crate::models::{Entity, NodeInfo};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Label added to the per-interface network series
pub const INTERFACE_LABEL: &str = "interface";
pub const HOST_LABEL: &str = "host";
pub const NODE_NAME_LABEL: &str = "node_name";
pub const NODE_ID_LABEL: &str = "node_id";
pub const SWARM_NODE_ID_LABEL: &str = "container_label_com_docker_swarm_node_id";

/// Prefix applied to every normalized container label
pub const LABEL_PREFIX: &str = "container_label_";

/// Labels every container series carries in standard mode
pub const BUILTIN_LABELS: [&str; 3] = ["id", "image", "name"];

/// Well-known container labels set by the kubelet
pub const POD_NAME_KEY: &str = "io.kubernetes.pod.name";
pub const POD_NAMESPACE_KEY: &str = "io.kubernetes.pod.namespace";

const ORCHESTRATOR_LABELS: [&str; 7] = [
    "id",
    "image",
    "pod",
    "namespace",
    "kubernetes_io_hostname",
    "beta_kubernetes_io_os",
    "kubernetes_io_role",
];

/// Label name to value mapping, ordered by name
pub type LabelSet = BTreeMap<String, String>;

/// How container labels are mapped onto series labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelMode {
    /// Built-ins plus every container label seen at freeze time
    Standard,
    /// Fixed pod/namespace oriented label set
    Orchestrator { node_name: String, node_os: String },
}

/// Ordered set of label names accepted by a metric vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    names: Vec<String>,
}

impl LabelSchema {
    fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self {
            names: names.into_iter().collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Label names as string slices, in the form vector constructors take
    pub fn as_strs(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn with_label(&self, name: &str) -> Self {
        Self::from_names(self.names.iter().cloned().chain([name.to_string()]))
    }

    /// Restrict `labels` to exactly this schema
    fn project(&self, mut labels: LabelSet) -> LabelSet {
        labels.retain(|name, _| self.contains(name));
        for name in &self.names {
            labels.entry(name.clone()).or_default();
        }
        labels
    }
}

/// Map a free-form container label key to a Prometheus label name
pub fn normalize(raw: &str) -> String {
    let body: String = raw
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '_') => c,
            _ => '_',
        })
        .collect();
    format!("{}{}", LABEL_PREFIX, body)
}

/// Computes, freezes and applies the container label schema
#[derive(Debug)]
pub struct LabelSchemaRegistry {
    mode: LabelMode,
    entity_schema: Option<LabelSchema>,
    interface_schema: Option<LabelSchema>,
}

impl LabelSchemaRegistry {
    pub fn new(mode: LabelMode) -> Self {
        Self {
            mode,
            entity_schema: None,
            interface_schema: None,
        }
    }

    pub fn mode(&self) -> &LabelMode {
        &self.mode
    }

    pub fn is_frozen(&self) -> bool {
        self.entity_schema.is_some()
    }

    /// Fix the schema from the containers currently known. Only allowed once.
    pub fn freeze<'a, I>(&mut self, entities: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        if self.is_frozen() {
            return Err(SchemaError::AlreadyFrozen);
        }

        let schema = match &self.mode {
            LabelMode::Standard => {
                let mut names: BTreeSet<String> =
                    BUILTIN_LABELS.iter().map(|s| s.to_string()).collect();
                for entity in entities {
                    names.extend(entity.labels.keys().map(|k| normalize(k)));
                }
                LabelSchema::from_names(names)
            }
            LabelMode::Orchestrator { .. } => LabelSchema::from_names(ORCHESTRATOR_LABELS),
        };

        info!(
            labels = schema.len(),
            mode = ?self.mode,
            "Froze container label schema"
        );

        self.interface_schema = Some(schema.with_label(INTERFACE_LABEL));
        self.entity_schema = Some(schema);
        Ok(())
    }

    pub fn entity_schema(&self) -> Result<&LabelSchema, SchemaError> {
        self.entity_schema.as_ref().ok_or(SchemaError::NotFrozen)
    }

    pub fn interface_schema(&self) -> Result<&LabelSchema, SchemaError> {
        self.interface_schema.as_ref().ok_or(SchemaError::NotFrozen)
    }

    /// Every label the container would carry before schema filtering
    fn raw_labels(&self, entity: &Entity) -> LabelSet {
        let mut labels = LabelSet::new();
        labels.insert("id".into(), format!("/docker/{}", entity.id));
        labels.insert("image".into(), entity.image.clone());

        match &self.mode {
            LabelMode::Standard => {
                labels.insert("name".into(), entity.name.clone());
                for (key, value) in &entity.labels {
                    labels.insert(normalize(key), value.clone());
                }
            }
            LabelMode::Orchestrator { node_name, node_os } => {
                let label = |key: &str| entity.labels.get(key).cloned().unwrap_or_default();
                labels.insert("pod".into(), label(POD_NAME_KEY));
                labels.insert("namespace".into(), label(POD_NAMESPACE_KEY));
                labels.insert("kubernetes_io_hostname".into(), node_name.clone());
                labels.insert("beta_kubernetes_io_os".into(), node_os.clone());
                labels.insert("kubernetes_io_role".into(), "node".into());
            }
        }

        labels
    }

    /// Label values for the per-container series
    pub fn project(&self, entity: &Entity) -> Result<LabelSet, SchemaError> {
        let schema = self.entity_schema()?;
        Ok(schema.project(self.raw_labels(entity)))
    }

    /// Label values for the per-container, per-interface series
    pub fn project_interface(
        &self,
        entity: &Entity,
        interface: &str,
    ) -> Result<LabelSet, SchemaError> {
        let mut labels = self.project(entity)?;
        labels.insert(INTERFACE_LABEL.into(), interface.into());
        Ok(labels)
    }

    /// Fixed schema of the node-level series
    pub fn node_schema() -> LabelSchema {
        LabelSchema::from_names([NODE_ID_LABEL, SWARM_NODE_ID_LABEL, NODE_NAME_LABEL])
    }

    /// Fixed schema of the per-container host liveness series
    pub fn host_schema() -> LabelSchema {
        LabelSchema::from_names([NODE_ID_LABEL, HOST_LABEL, NODE_NAME_LABEL])
    }

    pub fn node_labels(node: &NodeInfo) -> LabelSet {
        LabelSet::from([
            (NODE_ID_LABEL.to_string(), node.node_id.clone()),
            (SWARM_NODE_ID_LABEL.to_string(), node.node_id.clone()),
            (NODE_NAME_LABEL.to_string(), node.node_name.clone()),
        ])
    }

    pub fn host_labels(node: &NodeInfo, entity: &Entity) -> LabelSet {
        LabelSet::from([
            (NODE_ID_LABEL.to_string(), node.node_id.clone()),
            (HOST_LABEL.to_string(), entity.short_id().to_string()),
            (NODE_NAME_LABEL.to_string(), node.node_name.clone()),
        ])
    }
}
