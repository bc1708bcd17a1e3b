//! Aggregated run results — the immutable, read-only result set handed to
//! downstream format encoders and persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medforge_core::types::{EntityId, Vertical};
use medforge_journey::types::{EventStatus, Timeline};
use medforge_triggers::LinkedEntity;

/// One generated entity, in generation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: EntityId,
    pub vertical: Vertical,
    /// Set when the entity participates in a cross-vertical link.
    pub canonical_id: Option<Uuid>,
}

/// An entity whose build failed. The run carries on without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity_id: EntityId,
    pub vertical: Vertical,
    pub reason: String,
}

/// Validation counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub entities_generated: u64,
    pub entities_failed: u64,
    pub events_occurred: u64,
    pub events_skipped: u64,
    pub triggers_fired: u64,
    pub links_created: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub entities: Vec<EntityRecord>,
    pub timelines: BTreeMap<EntityId, Timeline>,
    pub links: BTreeMap<Uuid, LinkedEntity>,
    pub failures: Vec<EntityFailure>,
    pub metrics: RunMetrics,
    pub cancelled: bool,
}

impl RunResult {
    pub fn timeline(&self, entity_id: &EntityId) -> Option<&Timeline> {
        self.timelines.get(entity_id)
    }

    /// Entities generated for a given vertical, in generation order.
    pub fn entities_in(&self, vertical: Vertical) -> impl Iterator<Item = &EntityRecord> {
        self.entities.iter().filter(move |e| e.vertical == vertical)
    }

    pub fn count_status(&self, status: EventStatus) -> u64 {
        self.timelines
            .values()
            .flat_map(|t| t.events())
            .filter(|e| e.status == status)
            .count() as u64
    }
}
