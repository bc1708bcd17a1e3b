//! Cross-product coordination — watches finalized events, fires matching
//! triggers, and maintains the linked-entity arena that correlates one
//! simulated person across independently generated verticals.
//!
//! The arena holds ids only, never live references into timelines; target
//! generation itself is owned by the executor, which consumes the spawn
//! directives returned here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use medforge_core::config::NegativeDelayPolicy;
use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::seed::SeedContext;
use medforge_core::types::{EntityId, EntityState, Vertical};
use medforge_journey::delay::DelayResolver;
use medforge_journey::evaluator::{ConditionEvaluator, EvalContext};
use medforge_journey::types::{EventStatus, TimelineEvent};

use crate::registry::{GenerationAction, TriggerRegistry};

/// The timeline event that created a cross-vertical link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausingEvent {
    pub entity_id: EntityId,
    pub event_id: Uuid,
    pub event_type: String,
    pub at: DateTime<Utc>,
}

/// Canonical cross-vertical identity. Verticals may be added to `members`
/// over a run, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedEntity {
    pub canonical_id: Uuid,
    pub members: BTreeMap<Vertical, EntityId>,
    pub caused_by: CausingEvent,
}

/// Instruction to the executor: generate a linked journey in the target
/// vertical, anchored after the causing event.
#[derive(Debug, Clone)]
pub struct SpawnDirective {
    pub trigger_id: String,
    pub target_vertical: Vertical,
    pub canonical_id: Uuid,
    pub anchor_time: DateTime<Utc>,
    pub parent_event: Uuid,
    /// Segment to derive the spawned entity's seed context from the source
    /// entity's context.
    pub seed_segment: String,
}

pub struct CrossProductCoordinator {
    registry: TriggerRegistry,
    evaluator: ConditionEvaluator,
    delays: DelayResolver,
    links: DashMap<Uuid, LinkedEntity>,
    canonical_by_entity: DashMap<EntityId, Uuid>,
}

impl std::fmt::Debug for CrossProductCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossProductCoordinator")
            .field("triggers", &self.registry.len())
            .field("links", &self.links.len())
            .finish()
    }
}

impl CrossProductCoordinator {
    pub fn new(registry: TriggerRegistry, negative_delay: NegativeDelayPolicy) -> Self {
        Self {
            registry,
            evaluator: ConditionEvaluator::new(),
            delays: DelayResolver::new(negative_delay),
            links: DashMap::new(),
            canonical_by_entity: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Offer a finalized source event. Only `Occurred` events fire triggers;
    /// skips and cancellations never do. Returns the spawn directives for the
    /// executor, in firing order.
    pub fn on_event(
        &self,
        source_vertical: Vertical,
        entity_id: EntityId,
        event: &TimelineEvent,
        state: &EntityState,
        seed: &SeedContext,
        entity_anchor: DateTime<Utc>,
    ) -> ForgeResult<Vec<SpawnDirective>> {
        if event.status != EventStatus::Occurred {
            return Ok(Vec::new());
        }

        let mut directives = Vec::new();
        for trigger in self.registry.matches(source_vertical, event.event_type.name()) {
            if let Some(condition) = &trigger.condition {
                let ctx = EvalContext {
                    vertical: source_vertical,
                    occurrence: event.occurrence,
                    elapsed_days: (event.scheduled_at - entity_anchor).num_days(),
                };
                if !self.evaluator.evaluate(condition, state, &ctx)? {
                    continue;
                }
            }

            let canonical_id = self.link(source_vertical, entity_id, event, seed);
            debug!(
                trigger = %trigger.id,
                canonical_id = %canonical_id,
                source = %event.event_type.name(),
                "Trigger fired"
            );

            if trigger.action == GenerationAction::LinkOnly {
                continue;
            }
            // One journey per vertical per canonical identity: a target
            // vertical that is already a member only re-links.
            if let Some(link) = self.links.get(&canonical_id) {
                if link.members.contains_key(&trigger.target_vertical) {
                    continue;
                }
            }

            let anchor_time = match &trigger.delay {
                Some(delay) => {
                    let ctx = EvalContext {
                        vertical: source_vertical,
                        occurrence: event.occurrence,
                        elapsed_days: (event.scheduled_at - entity_anchor).num_days(),
                    };
                    let mut rng = seed
                        .derive(&format!("trigger/{}/{}", trigger.id, event.event_id))
                        .rng();
                    event.scheduled_at + self.delays.resolve(delay, state, &ctx, &mut rng)?
                }
                None => event.scheduled_at,
            };

            directives.push(SpawnDirective {
                trigger_id: trigger.id.clone(),
                target_vertical: trigger.target_vertical,
                canonical_id,
                anchor_time,
                parent_event: event.event_id,
                seed_segment: format!(
                    "link/{}/{}",
                    event.event_id,
                    trigger.target_vertical.as_str()
                ),
            });
        }
        Ok(directives)
    }

    /// Record a spawned entity under its canonical identity. Append-only: an
    /// existing membership for the vertical is never overwritten.
    pub fn record_member(
        &self,
        canonical_id: Uuid,
        vertical: Vertical,
        entity_id: EntityId,
    ) -> ForgeResult<()> {
        let mut link = self.links.get_mut(&canonical_id).ok_or_else(|| {
            ForgeError::Internal(anyhow::anyhow!(
                "unknown canonical id {canonical_id} for spawned entity"
            ))
        })?;
        link.members.entry(vertical).or_insert(entity_id);
        drop(link);
        self.canonical_by_entity.insert(entity_id, canonical_id);
        info!(canonical_id = %canonical_id, vertical = %vertical, entity_id = %entity_id, "Entity linked");
        Ok(())
    }

    pub fn canonical_for(&self, entity_id: EntityId) -> Option<Uuid> {
        self.canonical_by_entity.get(&entity_id).map(|c| *c)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Snapshot of the arena, ordered by canonical id.
    pub fn links(&self) -> BTreeMap<Uuid, LinkedEntity> {
        self.links
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Get-or-create the canonical identity for a source entity. The first
    /// firing trigger records its causing event; later firings reuse it.
    fn link(
        &self,
        source_vertical: Vertical,
        entity_id: EntityId,
        event: &TimelineEvent,
        seed: &SeedContext,
    ) -> Uuid {
        if let Some(existing) = self.canonical_by_entity.get(&entity_id) {
            return *existing;
        }
        let canonical_id = Uuid::from_u128(
            seed.derive(&format!("canonical/{}", event.event_id))
                .rng()
                .gen(),
        );
        let mut members = BTreeMap::new();
        members.insert(source_vertical, entity_id);
        self.links.insert(
            canonical_id,
            LinkedEntity {
                canonical_id,
                members,
                caused_by: CausingEvent {
                    entity_id,
                    event_id: event.event_id,
                    event_type: event.event_type.name().to_string(),
                    at: event.scheduled_at,
                },
            },
        );
        self.canonical_by_entity.insert(entity_id, canonical_id);
        canonical_id
    }
}
