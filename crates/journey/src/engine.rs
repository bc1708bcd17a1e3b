//! Timeline construction — walks a journey specification with a pending-event
//! frontier, resolving delays and conditions as events finalize in time order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use medforge_core::config::{EngineConfig, NegativeDelayPolicy};
use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::seed::SeedContext;
use medforge_core::types::{EntityId, EntityState};

use crate::delay::DelayResolver;
use crate::evaluator::{ConditionEvaluator, EvalContext};
use crate::skills::{SkillContext, SkillRegistry};
use crate::types::{
    Anchor, DelaySpec, EventStatus, JourneySpecification, Timeline, TimelineEvent,
};

/// A scheduled-but-not-finalized event on the frontier. Ordering is the
/// deterministic tie-break: scheduled time, then declaration order, then
/// lexical event-type name, then occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEvent {
    scheduled_at: DateTime<Utc>,
    decl_index: usize,
    type_name: &'static str,
    occurrence: u32,
    parent: Option<Uuid>,
}

impl Ord for PendingEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.scheduled_at
            .cmp(&other.scheduled_at)
            .then_with(|| self.decl_index.cmp(&other.decl_index))
            .then_with(|| self.type_name.cmp(other.type_name))
            .then_with(|| self.occurrence.cmp(&other.occurrence))
    }
}

impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Builds one entity's event timeline from its journey specification.
#[derive(Debug)]
pub struct JourneyEngine {
    config: EngineConfig,
    evaluator: ConditionEvaluator,
    delays: DelayResolver,
    skills: Arc<SkillRegistry>,
}

impl JourneyEngine {
    pub fn new(config: EngineConfig) -> Self {
        let delays = DelayResolver::new(config.negative_delay);
        Self {
            config,
            evaluator: ConditionEvaluator::new(),
            delays,
            skills: Arc::new(SkillRegistry::new()),
        }
    }

    /// Attach a shared skill registry for external lookups.
    pub fn with_skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = skills;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build an entity's timeline. All randomness flows through streams
    /// derived from `seed`; repeated calls with the same inputs produce
    /// byte-identical timelines.
    ///
    /// `parent` carries the cross-vertical causing event for triggered
    /// journeys; start-anchored events inherit it.
    pub fn build_timeline(
        &self,
        spec: &JourneySpecification,
        entity_id: EntityId,
        state: &EntityState,
        seed: &SeedContext,
        anchor_time: DateTime<Utc>,
        parent: Option<Uuid>,
    ) -> ForgeResult<Timeline> {
        spec.validate()?;
        debug!(journey = %spec.name, entity_id = %entity_id, "Building timeline");

        let mut index_by_id: HashMap<&str, usize> = HashMap::new();
        for (idx, def) in spec.events.iter().enumerate() {
            index_by_id.insert(def.id.as_str(), idx);
        }
        // dependents[i] = declaration indices anchored on events[i]
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); spec.events.len()];
        for (idx, def) in spec.events.iter().enumerate() {
            if let Anchor::Event(anchor_id) = &def.anchor {
                dependents[index_by_id[anchor_id.as_str()]].push(idx);
            }
        }

        let mut frontier: BinaryHeap<Reverse<PendingEvent>> = BinaryHeap::new();
        let mut scheduled_counts: Vec<u32> = vec![0; spec.events.len()];

        for (idx, def) in spec.events.iter().enumerate() {
            if matches!(def.anchor, Anchor::Start) {
                self.enqueue(
                    spec,
                    idx,
                    &def.delay,
                    anchor_time,
                    anchor_time,
                    state,
                    seed,
                    parent,
                    &mut frontier,
                    &mut scheduled_counts,
                )?;
            }
        }

        let mut finalized: Vec<TimelineEvent> = Vec::new();
        while let Some(Reverse(pending)) = frontier.pop() {
            let def = &spec.events[pending.decl_index];
            if finalized.len() >= self.config.max_timeline_events {
                return Err(ForgeError::UnboundedRecurrence {
                    definition_id: def.id.clone(),
                    occurrences: pending.occurrence,
                });
            }

            let ctx = EvalContext {
                vertical: spec.vertical,
                occurrence: pending.occurrence,
                elapsed_days: (pending.scheduled_at - anchor_time).num_days(),
            };
            let fires = match &def.condition {
                Some(condition) => self.evaluator.evaluate(condition, state, &ctx)?,
                None => true,
            };

            let occ_seed = seed.derive(&format!("evt/{}/{}", def.id, pending.occurrence));
            let event_id = Uuid::from_u128(occ_seed.derive("id").rng().gen());
            let parameters = if fires {
                let skill_ctx = SkillContext {
                    entity_id,
                    vertical: spec.vertical,
                    event_type: def.event_type.name(),
                    state,
                };
                self.skills.resolve_parameters(&def.parameters, &skill_ctx)?
            } else {
                BTreeMap::new()
            };

            if fires {
                for &child_idx in &dependents[pending.decl_index] {
                    self.enqueue(
                        spec,
                        child_idx,
                        &spec.events[child_idx].delay,
                        pending.scheduled_at,
                        anchor_time,
                        state,
                        seed,
                        Some(event_id),
                        &mut frontier,
                        &mut scheduled_counts,
                    )?;
                }
                if let Some(repeat) = &def.repeat {
                    let count = scheduled_counts[pending.decl_index];
                    let reached_max = repeat.max_occurrences.map_or(false, |max| count >= max);
                    let done = match &repeat.until {
                        Some(condition) => self.evaluator.evaluate(condition, state, &ctx)?,
                        None => false,
                    };
                    if !reached_max && !done {
                        if count >= self.config.repeat_safety_limit {
                            return Err(ForgeError::UnboundedRecurrence {
                                definition_id: def.id.clone(),
                                occurrences: count,
                            });
                        }
                        self.enqueue(
                            spec,
                            pending.decl_index,
                            &repeat.interval,
                            pending.scheduled_at,
                            anchor_time,
                            state,
                            seed,
                            Some(event_id),
                            &mut frontier,
                            &mut scheduled_counts,
                        )?;
                    }
                }
            }

            finalized.push(TimelineEvent {
                event_id,
                definition_id: def.id.clone(),
                event_type: def.event_type,
                scheduled_at: pending.scheduled_at,
                status: if fires {
                    EventStatus::Occurred
                } else {
                    EventStatus::Skipped
                },
                occurrence: pending.occurrence,
                parameters,
                parent: pending.parent,
            });
        }

        // Pre-anchor offsets can finalize out of order; the stable sort keeps
        // the pop-order tie-break within equal scheduled times.
        if self.config.negative_delay == NegativeDelayPolicy::AllowPreAnchor {
            finalized.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        }

        let mut timeline = Timeline::new(entity_id, spec.vertical, anchor_time);
        for event in finalized {
            timeline.push(event)?;
        }
        info!(
            journey = %spec.name,
            entity_id = %entity_id,
            events = timeline.len(),
            "Timeline sealed"
        );
        Ok(timeline)
    }

    /// Schedule the next occurrence of `spec.events[idx]` relative to
    /// `anchor_actual`, drawing the delay from that occurrence's own stream.
    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &self,
        spec: &JourneySpecification,
        idx: usize,
        delay: &DelaySpec,
        anchor_actual: DateTime<Utc>,
        entity_anchor: DateTime<Utc>,
        state: &EntityState,
        seed: &SeedContext,
        parent: Option<Uuid>,
        frontier: &mut BinaryHeap<Reverse<PendingEvent>>,
        scheduled_counts: &mut [u32],
    ) -> ForgeResult<()> {
        let def = &spec.events[idx];
        let occurrence = scheduled_counts[idx];
        scheduled_counts[idx] += 1;

        let ctx = EvalContext {
            vertical: spec.vertical,
            occurrence,
            elapsed_days: (anchor_actual - entity_anchor).num_days(),
        };
        let occ_seed = seed.derive(&format!("evt/{}/{}", def.id, occurrence));
        let mut rng = occ_seed.derive("delay").rng();
        let offset = self.delays.resolve(delay, state, &ctx, &mut rng)?;

        frontier.push(Reverse(PendingEvent {
            scheduled_at: anchor_actual + offset,
            decl_index: idx,
            type_name: def.event_type.name(),
            occurrence,
            parent,
        }));
        Ok(())
    }
}
