//! Trigger registration and matching. The registry is validated against the
//! journey specs before a run starts; a cyclic trigger chain is a setup-time
//! failure, never a runtime surprise.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::types::Vertical;
use medforge_journey::types::{DelaySpec, EventCondition, JourneySpecification};

/// What a fired trigger does in the target vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationAction {
    /// Create the linked entity and generate its journey.
    SpawnJourney,
    /// Record the identity correlation only.
    LinkOnly,
}

/// A cross-vertical trigger: (source vertical, source event type) →
/// (target vertical, generation action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredTrigger {
    pub id: String,
    pub source_vertical: Vertical,
    /// Stable event-type name within the source vertical.
    pub source_event: String,
    pub target_vertical: Vertical,
    pub action: GenerationAction,
    #[serde(default)]
    pub priority: i32,
    /// Optional delay overlay between the source event and the spawned
    /// journey's anchor.
    #[serde(default)]
    pub delay: Option<DelaySpec>,
    /// Optional condition overlay evaluated against the source entity.
    #[serde(default)]
    pub condition: Option<EventCondition>,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerRegistry {
    triggers: Vec<RegisteredTrigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_triggers(triggers: Vec<RegisteredTrigger>) -> Self {
        Self { triggers }
    }

    pub fn register(&mut self, trigger: RegisteredTrigger) {
        self.triggers.push(trigger);
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn triggers(&self) -> &[RegisteredTrigger] {
        &self.triggers
    }

    /// Triggers matching a finalized source event, in firing order:
    /// descending priority, then registration order.
    pub fn matches(&self, vertical: Vertical, event_type: &str) -> Vec<&RegisteredTrigger> {
        let mut matched: Vec<(usize, &RegisteredTrigger)> = self
            .triggers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.source_vertical == vertical && t.source_event == event_type)
            .collect();
        matched.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.0.cmp(&b.0)));
        matched.into_iter().map(|(_, t)| t).collect()
    }

    /// Setup-time validation against the registered journey specs.
    ///
    /// Nodes of the trigger graph are `(vertical, event-type name)`; each
    /// spawning trigger contributes edges from its source node to every
    /// event-type node its target journey can emit. Any cycle means an event
    /// type can transitively re-trigger itself.
    pub fn validate(
        &self,
        specs: &BTreeMap<Vertical, JourneySpecification>,
    ) -> ForgeResult<()> {
        type Node = (Vertical, String);
        // BTreeMap keeps traversal order, and therefore error reporting,
        // deterministic across runs.
        let mut edges: BTreeMap<Node, Vec<Node>> = BTreeMap::new();

        for trigger in &self.triggers {
            if let Some(delay) = &trigger.delay {
                delay.validate().map_err(|err| {
                    ForgeError::Specification(format!("trigger `{}`: {err}", trigger.id))
                })?;
            }
            if trigger.action == GenerationAction::LinkOnly {
                continue;
            }
            let target_spec = specs.get(&trigger.target_vertical).ok_or_else(|| {
                ForgeError::Specification(format!(
                    "trigger `{}` targets vertical `{}` with no registered journey",
                    trigger.id, trigger.target_vertical
                ))
            })?;
            let source_known = specs
                .get(&trigger.source_vertical)
                .map(|s| {
                    s.events
                        .iter()
                        .any(|d| d.event_type.name() == trigger.source_event)
                })
                .unwrap_or(false);
            if !source_known {
                warn!(
                    trigger = %trigger.id,
                    source = %trigger.source_event,
                    "trigger source event never emitted by registered journeys"
                );
            }

            let from: Node = (trigger.source_vertical, trigger.source_event.clone());
            let entry = edges.entry(from).or_default();
            for def in &target_spec.events {
                entry.push((trigger.target_vertical, def.event_type.name().to_string()));
            }
        }

        // Three-color DFS over the trigger-reachability graph.
        let mut done: HashSet<Node> = HashSet::new();
        for start in edges.keys() {
            if done.contains(start) {
                continue;
            }
            let mut in_progress: HashSet<Node> = HashSet::new();
            let mut stack: Vec<(Node, usize)> = vec![(start.clone(), 0)];
            in_progress.insert(start.clone());
            while let Some((node, next_child)) = stack.pop() {
                let children = edges.get(&node).map(|c| c.as_slice()).unwrap_or(&[]);
                if next_child < children.len() {
                    let child = children[next_child].clone();
                    stack.push((node, next_child + 1));
                    if in_progress.contains(&child) {
                        return Err(ForgeError::CyclicTrigger(format!(
                            "event type `{}` in vertical `{}` transitively re-triggers itself",
                            child.1, child.0
                        )));
                    }
                    if !done.contains(&child) {
                        in_progress.insert(child.clone());
                        stack.push((child, 0));
                    }
                } else {
                    in_progress.remove(&node);
                    done.insert(node);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    use medforge_core::types::{
        MemberEvent, PatientEvent, PharmacyEvent, VerticalEvent,
    };
    use medforge_journey::types::{Anchor, EventDefinition};

    fn trigger(
        id: &str,
        source: Vertical,
        source_event: &str,
        target: Vertical,
        priority: i32,
    ) -> RegisteredTrigger {
        RegisteredTrigger {
            id: id.to_string(),
            source_vertical: source,
            source_event: source_event.to_string(),
            target_vertical: target,
            action: GenerationAction::SpawnJourney,
            priority,
            delay: None,
            condition: None,
        }
    }

    fn one_event_spec(vertical: Vertical, event_type: VerticalEvent) -> JourneySpecification {
        JourneySpecification {
            id: Uuid::nil(),
            name: format!("{vertical}-journey"),
            vertical,
            version: 1,
            events: vec![EventDefinition {
                id: "e1".to_string(),
                event_type,
                anchor: Anchor::Start,
                delay: DelaySpec::days(0),
                condition: None,
                repeat: None,
                parameters: BTreeMap::new(),
            }],
        }
    }

    #[test]
    fn test_matching_order_priority_then_registration() {
        let mut registry = TriggerRegistry::new();
        for t in [
            trigger("low", Vertical::Clinical, "diagnosis", Vertical::Pharmacy, 1),
            trigger("high", Vertical::Clinical, "diagnosis", Vertical::HealthPlan, 9),
            trigger("mid-a", Vertical::Clinical, "diagnosis", Vertical::Trials, 5),
            trigger("mid-b", Vertical::Clinical, "diagnosis", Vertical::Pharmacy, 5),
            trigger("other", Vertical::Clinical, "encounter", Vertical::Pharmacy, 9),
        ] {
            registry.register(t);
        }
        assert_eq!(registry.len(), 5);
        assert!(!registry.is_empty());

        let matched = registry.matches(Vertical::Clinical, "diagnosis");
        let ids: Vec<&str> = matched.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid-a", "mid-b", "low"]);

        assert!(registry.matches(Vertical::Pharmacy, "diagnosis").is_empty());
    }

    #[test]
    fn test_validate_accepts_acyclic_set() {
        let mut specs = BTreeMap::new();
        specs.insert(
            Vertical::Clinical,
            one_event_spec(Vertical::Clinical, VerticalEvent::Patient(PatientEvent::Diagnosis)),
        );
        specs.insert(
            Vertical::Pharmacy,
            one_event_spec(Vertical::Pharmacy, VerticalEvent::Pharmacy(PharmacyEvent::Fill)),
        );
        specs.insert(
            Vertical::HealthPlan,
            one_event_spec(Vertical::HealthPlan, VerticalEvent::Member(MemberEvent::Claim)),
        );

        let registry = TriggerRegistry::from_triggers(vec![
            trigger("dx-rx", Vertical::Clinical, "diagnosis", Vertical::Pharmacy, 0),
            trigger("rx-claim", Vertical::Pharmacy, "fill", Vertical::HealthPlan, 0),
        ]);
        assert!(registry.validate(&specs).is_ok());
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let mut specs = BTreeMap::new();
        specs.insert(
            Vertical::Clinical,
            one_event_spec(Vertical::Clinical, VerticalEvent::Patient(PatientEvent::Diagnosis)),
        );
        specs.insert(
            Vertical::Pharmacy,
            one_event_spec(Vertical::Pharmacy, VerticalEvent::Pharmacy(PharmacyEvent::Fill)),
        );

        let registry = TriggerRegistry::from_triggers(vec![
            trigger("a-b", Vertical::Clinical, "diagnosis", Vertical::Pharmacy, 0),
            trigger("b-a", Vertical::Pharmacy, "fill", Vertical::Clinical, 0),
        ]);
        assert!(matches!(
            registry.validate(&specs),
            Err(ForgeError::CyclicTrigger(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_target_spec() {
        let mut specs = BTreeMap::new();
        specs.insert(
            Vertical::Clinical,
            one_event_spec(Vertical::Clinical, VerticalEvent::Patient(PatientEvent::Diagnosis)),
        );
        let registry = TriggerRegistry::from_triggers(vec![trigger(
            "dx-rx",
            Vertical::Clinical,
            "diagnosis",
            Vertical::Pharmacy,
            0,
        )]);
        assert!(matches!(
            registry.validate(&specs),
            Err(ForgeError::Specification(_))
        ));
    }

    #[test]
    fn test_link_only_triggers_do_not_create_edges() {
        let mut specs = BTreeMap::new();
        specs.insert(
            Vertical::Clinical,
            one_event_spec(Vertical::Clinical, VerticalEvent::Patient(PatientEvent::Diagnosis)),
        );
        specs.insert(
            Vertical::Pharmacy,
            one_event_spec(Vertical::Pharmacy, VerticalEvent::Pharmacy(PharmacyEvent::Fill)),
        );

        let mut back = trigger("b-a", Vertical::Pharmacy, "fill", Vertical::Clinical, 0);
        back.action = GenerationAction::LinkOnly;
        let registry = TriggerRegistry::from_triggers(vec![
            trigger("a-b", Vertical::Clinical, "diagnosis", Vertical::Pharmacy, 0),
            back,
        ]);
        assert!(registry.validate(&specs).is_ok());
    }
}
