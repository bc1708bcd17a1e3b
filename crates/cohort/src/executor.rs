//! Cohort orchestration — derives per-entity seeds, samples attributes
//! through the injected source, builds timelines, and fans out cross-vertical
//! generation through the coordinator's work queue.
//!
//! A triggered journey is enqueued only after its causing source event has
//! finalized, so the cross-vertical dependency edge is honored by
//! construction. A single entity's failure is recorded and the run carries
//! on; setup errors abort before any entity work.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use medforge_core::config::AppConfig;
use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::event_bus::{make_event, noop_sink, EventSink};
use medforge_core::seed::SeedContext;
use medforge_core::types::{EntityId, EntityState, GenerationEventKind, Vertical};
use medforge_journey::engine::JourneyEngine;
use medforge_journey::skills::SkillRegistry;
use medforge_journey::types::{EventStatus, JourneySpecification};
use medforge_triggers::{CrossProductCoordinator, RegisteredTrigger, TriggerRegistry};

use crate::result::{EntityFailure, EntityRecord, RunMetrics, RunResult};

/// Externally supplied attribute distributions. The engine consumes sampled
/// states; it never generates attributes itself.
pub trait AttributeSource: Send + Sync {
    fn sample(&self, vertical: Vertical, seed: &SeedContext) -> ForgeResult<EntityState>;
}

/// Returns a fixed state per vertical. Enough for profiles whose variation
/// lives entirely in delays and triggers, and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAttributeSource {
    states: BTreeMap<Vertical, EntityState>,
}

impl StaticAttributeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, vertical: Vertical, state: EntityState) -> Self {
        self.states.insert(vertical, state);
        self
    }
}

impl AttributeSource for StaticAttributeSource {
    fn sample(&self, vertical: Vertical, _seed: &SeedContext) -> ForgeResult<EntityState> {
        Ok(self.states.get(&vertical).cloned().unwrap_or_default())
    }
}

/// Cloneable cancellation flag. A cancelled run stops between entities and
/// discards in-flight work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Declarative description of one bulk-generation run.
#[derive(Debug, Clone)]
pub struct GenerationProfile {
    pub name: String,
    pub primary_vertical: Vertical,
    pub cohort_size: usize,
    pub specs: BTreeMap<Vertical, JourneySpecification>,
    pub triggers: Vec<RegisteredTrigger>,
    /// The run epoch every entity's timeline is anchored on. Supplied by the
    /// caller so runs are reproducible.
    pub anchor_time: DateTime<Utc>,
}

/// One pending entity build on the work queue.
struct GenerationRequest {
    vertical: Vertical,
    seed: SeedContext,
    anchor_time: DateTime<Utc>,
    canonical_id: Option<Uuid>,
    parent_event: Option<Uuid>,
}

/// Orchestrates bulk generation across a cohort and its linked verticals.
pub struct CohortGenerator {
    config: AppConfig,
    engine: JourneyEngine,
    attributes: Arc<dyn AttributeSource>,
    sink: Arc<dyn EventSink>,
    cancel: CancelToken,
}

impl std::fmt::Debug for CohortGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortGenerator")
            .field("node_id", &self.config.node_id)
            .finish()
    }
}

impl CohortGenerator {
    pub fn new(config: AppConfig, attributes: Arc<dyn AttributeSource>) -> Self {
        let engine = JourneyEngine::new(config.engine.clone());
        Self {
            config,
            engine,
            attributes,
            sink: noop_sink(),
            cancel: CancelToken::new(),
        }
    }

    /// Attach an event sink for run observability.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attach a shared skill registry for external lookups.
    pub fn with_skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.engine = JourneyEngine::new(self.config.engine.clone()).with_skills(skills);
        self
    }

    /// Token callers can use to cancel an in-flight run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run bulk generation. Setup errors (malformed specs, cyclic triggers)
    /// abort before any entity is processed; entity-scoped errors are
    /// recorded and the run continues.
    pub fn run(&self, profile: &GenerationProfile, root_seed: u64) -> ForgeResult<RunResult> {
        let run_id = format!("{}-{}", profile.name, root_seed);
        info!(
            run_id = %run_id,
            cohort_size = profile.cohort_size,
            primary = %profile.primary_vertical,
            "Starting generation run"
        );

        // Setup scope: everything here is fatal.
        if !profile.specs.contains_key(&profile.primary_vertical) {
            return Err(ForgeError::Specification(format!(
                "profile `{}` has no journey for primary vertical `{}`",
                profile.name, profile.primary_vertical
            )));
        }
        for (vertical, spec) in &profile.specs {
            if spec.vertical != *vertical {
                return Err(ForgeError::Specification(format!(
                    "journey `{}` registered under vertical `{}` but declares `{}`",
                    spec.name, vertical, spec.vertical
                )));
            }
            spec.validate()?;
        }
        let registry = TriggerRegistry::from_triggers(profile.triggers.clone());
        registry.validate(&profile.specs)?;
        let coordinator =
            CrossProductCoordinator::new(registry, self.config.engine.negative_delay);

        self.sink.emit(make_event(
            GenerationEventKind::CohortStarted,
            run_id.clone(),
            None,
            Some(profile.primary_vertical),
            Some(format!("cohort_size={}", profile.cohort_size)),
        ));

        let cohort_seed = SeedContext::root(root_seed).derive("cohort");
        let mut queue: VecDeque<GenerationRequest> = (0..profile.cohort_size)
            .map(|index| GenerationRequest {
                vertical: profile.primary_vertical,
                seed: cohort_seed.derive(&format!("entity/{index}")),
                anchor_time: profile.anchor_time,
                canonical_id: None,
                parent_event: None,
            })
            .collect();

        let mut entities: Vec<EntityRecord> = Vec::new();
        let mut timelines = BTreeMap::new();
        let mut failures: Vec<EntityFailure> = Vec::new();
        let mut metrics = RunMetrics::default();
        let mut cancelled = false;

        while let Some(request) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, "Run cancelled; discarding in-flight work");
                cancelled = true;
                break;
            }

            let entity_id: EntityId = Uuid::from_u128(request.seed.derive("id").rng().gen());
            let spec = &profile.specs[&request.vertical];

            let state = match self
                .attributes
                .sample(request.vertical, &request.seed.derive("attributes"))
            {
                Ok(state) => state,
                Err(err) => {
                    self.record_failure(&mut failures, &mut metrics, &run_id, entity_id, request.vertical, err);
                    continue;
                }
            };

            let timeline = match self.engine.build_timeline(
                spec,
                entity_id,
                &state,
                &request.seed,
                request.anchor_time,
                request.parent_event,
            ) {
                Ok(timeline) => timeline,
                Err(err) => {
                    self.record_failure(&mut failures, &mut metrics, &run_id, entity_id, request.vertical, err);
                    continue;
                }
            };

            if let Some(canonical_id) = request.canonical_id {
                coordinator.record_member(canonical_id, request.vertical, entity_id)?;
                self.sink.emit(make_event(
                    GenerationEventKind::EntityLinked,
                    run_id.clone(),
                    Some(entity_id),
                    Some(request.vertical),
                    Some(canonical_id.to_string()),
                ));
            }

            // Triggers fire only off finalized, occurred events; spawned
            // journeys join the back of the queue.
            for event in timeline.events() {
                if event.status != EventStatus::Occurred {
                    continue;
                }
                let directives = coordinator.on_event(
                    request.vertical,
                    entity_id,
                    event,
                    &state,
                    &request.seed,
                    request.anchor_time,
                )?;
                for directive in directives {
                    metrics.triggers_fired += 1;
                    self.sink.emit(make_event(
                        GenerationEventKind::TriggerFired,
                        run_id.clone(),
                        Some(entity_id),
                        Some(directive.target_vertical),
                        Some(directive.trigger_id.clone()),
                    ));
                    queue.push_back(GenerationRequest {
                        vertical: directive.target_vertical,
                        seed: request.seed.derive(&directive.seed_segment),
                        anchor_time: directive.anchor_time,
                        canonical_id: Some(directive.canonical_id),
                        parent_event: Some(directive.parent_event),
                    });
                }
            }

            metrics.entities_generated += 1;
            metrics.events_occurred += timeline.occurred().count() as u64;
            metrics.events_skipped += timeline
                .events()
                .iter()
                .filter(|e| e.status == EventStatus::Skipped)
                .count() as u64;

            self.sink.emit(make_event(
                GenerationEventKind::EntityGenerated,
                run_id.clone(),
                Some(entity_id),
                Some(request.vertical),
                None,
            ));

            entities.push(EntityRecord {
                entity_id,
                vertical: request.vertical,
                canonical_id: coordinator.canonical_for(entity_id),
            });
            timelines.insert(entity_id, timeline);
        }

        let links = coordinator.links();
        metrics.links_created = links.len() as u64;

        self.sink.emit(make_event(
            GenerationEventKind::CohortCompleted,
            run_id.clone(),
            None,
            Some(profile.primary_vertical),
            Some(format!(
                "generated={} failed={}",
                metrics.entities_generated, metrics.entities_failed
            )),
        ));
        info!(
            run_id = %run_id,
            generated = metrics.entities_generated,
            failed = metrics.entities_failed,
            links = metrics.links_created,
            "Generation run finished"
        );

        Ok(RunResult {
            run_id,
            entities,
            timelines,
            links,
            failures,
            metrics,
            cancelled,
        })
    }

    fn record_failure(
        &self,
        failures: &mut Vec<EntityFailure>,
        metrics: &mut RunMetrics,
        run_id: &str,
        entity_id: EntityId,
        vertical: Vertical,
        err: ForgeError,
    ) {
        warn!(entity_id = %entity_id, vertical = %vertical, error = %err, "Entity build failed");
        metrics.entities_failed += 1;
        self.sink.emit(make_event(
            GenerationEventKind::EntityFailed,
            run_id.to_string(),
            Some(entity_id),
            Some(vertical),
            Some(err.to_string()),
        ));
        failures.push(EntityFailure {
            entity_id,
            vertical,
            reason: err.to_string(),
        });
    }
}
