//! End-to-end generation flow: journey building, cross-vertical triggering,
//! determinism, and partial-failure semantics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use medforge_cohort::{
    AttributeSource, CohortGenerator, GenerationProfile, StaticAttributeSource,
};
use medforge_core::config::AppConfig;
use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::event_bus::capture_sink;
use medforge_core::seed::SeedContext;
use medforge_core::types::{
    EntityState, GenerationEventKind, MemberEvent, PharmacyEvent, Vertical, VerticalEvent,
};
use medforge_journey::engine::JourneyEngine;
use medforge_journey::types::{
    Anchor, ComparisonOp, DelaySpec, EventCondition, EventDefinition, EventStatus,
    JourneySpecification,
};
use medforge_triggers::{GenerationAction, RegisteredTrigger};

fn anchor_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn definition(
    id: &str,
    event_type: VerticalEvent,
    anchor: Anchor,
    delay: DelaySpec,
) -> EventDefinition {
    EventDefinition {
        id: id.to_string(),
        event_type,
        anchor,
        delay,
        condition: None,
        repeat: None,
        parameters: BTreeMap::new(),
    }
}

/// The reference scenario: enrollment at day 0, an age-gated claim 30 days
/// later, and a trigger spawning a linked pharmacy member off the enrollment.
fn member_spec() -> JourneySpecification {
    let mut claim = definition(
        "e2",
        VerticalEvent::Member(MemberEvent::Claim),
        Anchor::Event("e1".to_string()),
        DelaySpec::days(30),
    );
    claim.condition = Some(EventCondition::attribute(
        "age",
        ComparisonOp::GreaterThanOrEqual,
        65,
    ));
    JourneySpecification {
        id: uuid::Uuid::nil(),
        name: "member-journey".to_string(),
        vertical: Vertical::HealthPlan,
        version: 1,
        events: vec![
            definition(
                "e1",
                VerticalEvent::Member(MemberEvent::Enrollment),
                Anchor::Start,
                DelaySpec::days(0),
            ),
            claim,
        ],
    }
}

fn pharmacy_spec() -> JourneySpecification {
    JourneySpecification {
        id: uuid::Uuid::nil(),
        name: "pharmacy-journey".to_string(),
        vertical: Vertical::Pharmacy,
        version: 1,
        events: vec![definition(
            "rx1",
            VerticalEvent::Pharmacy(PharmacyEvent::Fill),
            Anchor::Start,
            DelaySpec::days(0),
        )],
    }
}

fn enrollment_trigger() -> RegisteredTrigger {
    RegisteredTrigger {
        id: "enroll-rx".to_string(),
        source_vertical: Vertical::HealthPlan,
        source_event: "enrollment".to_string(),
        target_vertical: Vertical::Pharmacy,
        action: GenerationAction::SpawnJourney,
        priority: 0,
        delay: None,
        condition: None,
    }
}

fn scenario_profile(cohort_size: usize) -> GenerationProfile {
    let mut specs = BTreeMap::new();
    specs.insert(Vertical::HealthPlan, member_spec());
    specs.insert(Vertical::Pharmacy, pharmacy_spec());
    GenerationProfile {
        name: "scenario".to_string(),
        primary_vertical: Vertical::HealthPlan,
        cohort_size,
        specs,
        triggers: vec![enrollment_trigger()],
        anchor_time: anchor_ts(),
    }
}

fn generator_with_age(age: i64) -> CohortGenerator {
    let attributes = StaticAttributeSource::new()
        .with(Vertical::HealthPlan, EntityState::new().with("age", age))
        .with(Vertical::Pharmacy, EntityState::new());
    CohortGenerator::new(AppConfig::default(), Arc::new(attributes))
}

#[test]
fn test_senior_member_scenario() {
    init_tracing();
    let result = generator_with_age(70)
        .run(&scenario_profile(1), 42)
        .unwrap();

    assert!(result.failures.is_empty());
    assert_eq!(result.metrics.entities_generated, 2);
    assert_eq!(result.metrics.triggers_fired, 1);
    assert_eq!(result.links.len(), 1);

    let member = result.entities_in(Vertical::HealthPlan).next().unwrap();
    let timeline = result.timeline(&member.entity_id).unwrap();
    assert_eq!(timeline.len(), 2);

    let e1 = &timeline.events()[0];
    assert_eq!(e1.definition_id, "e1");
    assert_eq!(e1.scheduled_at, anchor_ts());
    assert_eq!(e1.status, EventStatus::Occurred);

    let e2 = &timeline.events()[1];
    assert_eq!(e2.definition_id, "e2");
    assert_eq!(e2.scheduled_at, anchor_ts() + chrono::Duration::days(30));
    assert_eq!(e2.status, EventStatus::Occurred);

    // The link references vertical B and the causing enrollment event.
    let link = result.links.values().next().unwrap();
    assert_eq!(link.caused_by.event_id, e1.event_id);
    assert_eq!(link.members.len(), 2);
    assert!(link.members.contains_key(&Vertical::Pharmacy));
    assert_eq!(link.members[&Vertical::HealthPlan], member.entity_id);
    assert_eq!(member.canonical_id, Some(link.canonical_id));

    // The spawned pharmacy timeline chains off the enrollment event.
    let pharmacy = result.entities_in(Vertical::Pharmacy).next().unwrap();
    let rx = result.timeline(&pharmacy.entity_id).unwrap();
    assert_eq!(rx.anchor_time(), e1.scheduled_at);
    assert_eq!(rx.events()[0].parent, Some(e1.event_id));
}

#[test]
fn test_young_member_skips_claim_but_still_links() {
    let result = generator_with_age(40)
        .run(&scenario_profile(1), 42)
        .unwrap();

    let member = result.entities_in(Vertical::HealthPlan).next().unwrap();
    let timeline = result.timeline(&member.entity_id).unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline.events()[0].status, EventStatus::Occurred);
    assert_eq!(timeline.events()[1].status, EventStatus::Skipped);
    assert_eq!(
        timeline.events()[1].scheduled_at,
        anchor_ts() + chrono::Duration::days(30)
    );

    // The trigger depends only on E1, not E2.
    assert_eq!(result.links.len(), 1);
    assert_eq!(result.metrics.events_skipped, 1);
    assert_eq!(result.count_status(EventStatus::Skipped), 1);
}

#[test]
fn test_repeated_runs_are_byte_identical() {
    let first = generator_with_age(70)
        .run(&scenario_profile(8), 42)
        .unwrap();
    let second = generator_with_age(70)
        .run(&scenario_profile(8), 42)
        .unwrap();

    assert_eq!(first.entities, second.entities);
    assert_eq!(first.timelines, second.timelines);
    assert_eq!(first.links, second.links);
    assert_eq!(
        serde_json::to_string(&first.timelines).unwrap(),
        serde_json::to_string(&second.timelines).unwrap()
    );

    let third = generator_with_age(70)
        .run(&scenario_profile(8), 43)
        .unwrap();
    assert_ne!(
        first.entities.first().map(|e| e.entity_id),
        third.entities.first().map(|e| e.entity_id)
    );
}

#[test]
fn test_timeline_reproducible_outside_the_cohort() {
    // Seed derivation is a pure function of the path, so one entity's
    // timeline can be rebuilt standalone, in any order, bit-for-bit.
    let result = generator_with_age(70)
        .run(&scenario_profile(6), 42)
        .unwrap();
    let member = result.entities_in(Vertical::HealthPlan).nth(3).unwrap();

    let seed = SeedContext::root(42).derive("cohort").derive("entity/3");
    let entity_id = uuid::Uuid::from_u128(rand::Rng::gen(&mut seed.derive("id").rng()));
    assert_eq!(entity_id, member.entity_id);

    let engine = JourneyEngine::new(AppConfig::default().engine);
    let rebuilt = engine
        .build_timeline(
            &member_spec(),
            entity_id,
            &EntityState::new().with("age", 70),
            &seed,
            anchor_ts(),
            None,
        )
        .unwrap();
    assert_eq!(&rebuilt, result.timeline(&member.entity_id).unwrap());
}

/// Omits the `age` attribute for the sixth cohort entity only.
struct MissingAgeForOne;

impl AttributeSource for MissingAgeForOne {
    fn sample(&self, vertical: Vertical, seed: &SeedContext) -> ForgeResult<EntityState> {
        if vertical == Vertical::HealthPlan && !seed.path().contains("entity/5/") {
            Ok(EntityState::new().with("age", 70))
        } else {
            Ok(EntityState::new())
        }
    }
}

#[test]
fn test_partial_failure_keeps_the_run_alive() {
    let mut profile = scenario_profile(10);
    profile.triggers.clear();
    let generator = CohortGenerator::new(AppConfig::default(), Arc::new(MissingAgeForOne));

    let result = generator.run(&profile, 42).unwrap();

    assert_eq!(result.metrics.entities_generated, 9);
    assert_eq!(result.metrics.entities_failed, 1);
    assert_eq!(result.timelines.len(), 9);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].reason.contains("age"));
    assert_eq!(result.failures[0].vertical, Vertical::HealthPlan);
}

/// Counts samples so setup-failure tests can prove no entity work started.
#[derive(Default)]
struct CountingSource {
    calls: AtomicUsize,
}

impl AttributeSource for CountingSource {
    fn sample(&self, _vertical: Vertical, _seed: &SeedContext) -> ForgeResult<EntityState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EntityState::new())
    }
}

#[test]
fn test_trigger_cycle_aborts_before_any_entity() {
    let mut profile = scenario_profile(5);
    // fill → health_plan closes the loop: enrollment → fill → enrollment.
    profile.triggers.push(RegisteredTrigger {
        id: "rx-enroll".to_string(),
        source_vertical: Vertical::Pharmacy,
        source_event: "fill".to_string(),
        target_vertical: Vertical::HealthPlan,
        action: GenerationAction::SpawnJourney,
        priority: 0,
        delay: None,
        condition: None,
    });

    let source = Arc::new(CountingSource::default());
    let generator = CohortGenerator::new(AppConfig::default(), source.clone());
    let result = generator.run(&profile, 42);

    assert!(matches!(result, Err(ForgeError::CyclicTrigger(_))));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancelled_run_discards_in_flight_work() {
    let generator = generator_with_age(70);
    generator.cancel_token().cancel();

    let result = generator.run(&scenario_profile(5), 42).unwrap();
    assert!(result.cancelled);
    assert!(result.timelines.is_empty());
    assert_eq!(result.metrics.entities_generated, 0);
}

#[test]
fn test_sink_observes_run_lifecycle() {
    let sink = capture_sink();
    let generator = generator_with_age(70).with_event_sink(sink.clone());

    generator.run(&scenario_profile(2), 42).unwrap();

    assert_eq!(sink.count_kind(GenerationEventKind::CohortStarted), 1);
    assert_eq!(sink.count_kind(GenerationEventKind::CohortCompleted), 1);
    // 2 members + 2 spawned pharmacy entities.
    assert_eq!(sink.count_kind(GenerationEventKind::EntityGenerated), 4);
    assert_eq!(sink.count_kind(GenerationEventKind::TriggerFired), 2);
    assert_eq!(sink.count_kind(GenerationEventKind::EntityLinked), 2);
}
