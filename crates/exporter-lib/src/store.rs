//! In-memory state for tracked containers
//!
//! Holds the static metadata of every known container and the single most
//! recent stats snapshot, which becomes the baseline for the next cycle.

use crate::models::{Entity, RawSnapshot};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug)]
struct Tracked {
    entity: Entity,
    snapshot: Option<RawSnapshot>,
    /// Interfaces that have had series written for them
    interfaces: BTreeSet<String>,
}

/// What was stored for a container that has been forgotten
#[derive(Debug)]
pub struct Evicted {
    pub entity: Entity,
    pub last: Option<RawSnapshot>,
    /// Every interface with published series, including ones that have
    /// since disappeared from the snapshots
    pub interfaces: BTreeSet<String>,
}

/// Per-container metadata and previous snapshot
#[derive(Debug, Default)]
pub struct SnapshotStore {
    tracked: HashMap<String, Tracked>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store metadata for a container seen for the first time.
    ///
    /// Returns `false` and leaves the existing entry untouched when the
    /// container is already known.
    pub fn upsert_metadata(&mut self, entity: Entity) -> bool {
        if self.tracked.contains_key(&entity.id) {
            return false;
        }
        debug!(container_id = %entity.id, "Tracking container");
        self.tracked.insert(
            entity.id.clone(),
            Tracked {
                entity,
                snapshot: None,
                interfaces: BTreeSet::new(),
            },
        );
        true
    }

    /// Whether metadata is stored for this container
    pub fn contains(&self, id: &str) -> bool {
        self.tracked.contains_key(id)
    }

    pub fn metadata(&self, id: &str) -> Option<&Entity> {
        self.tracked.get(id).map(|t| &t.entity)
    }

    /// Snapshot recorded on the previous cycle
    pub fn previous(&self, id: &str) -> Option<&RawSnapshot> {
        self.tracked.get(id).and_then(|t| t.snapshot.as_ref())
    }

    /// Replace the stored snapshot; ignored for containers without metadata
    pub fn set_latest(&mut self, id: &str, snapshot: RawSnapshot) {
        if let Some(tracked) = self.tracked.get_mut(id) {
            tracked.snapshot = Some(snapshot);
        }
    }

    /// Remember interfaces whose series were written this cycle
    pub fn record_interfaces<I>(&mut self, id: &str, interfaces: I)
    where
        I: IntoIterator<Item = String>,
    {
        if let Some(tracked) = self.tracked.get_mut(id) {
            tracked.interfaces.extend(interfaces);
        }
    }

    pub fn known_ids(&self) -> BTreeSet<String> {
        self.tracked.keys().cloned().collect()
    }

    /// Iterate over the metadata of every tracked container
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.tracked.values().map(|t| &t.entity)
    }

    /// Forget a container, returning what was stored for it
    pub fn evict(&mut self, id: &str) -> Option<Evicted> {
        debug!(container_id = %id, "Forgetting container");
        self.tracked.remove(id).map(|t| {
            let mut interfaces = t.interfaces;
            if let Some(last) = &t.snapshot {
                interfaces.extend(last.networks.keys().cloned());
            }
            Evicted {
                entity: t.entity,
                last: t.snapshot,
                interfaces,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}
