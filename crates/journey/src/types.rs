use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::types::{EntityId, Vertical, VerticalEvent};

/// A journey specification describing one vertical's longitudinal event flow.
/// Immutable, loaded once as configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneySpecification {
    pub id: Uuid,
    pub name: String,
    pub vertical: Vertical,
    pub version: u32,
    pub events: Vec<EventDefinition>,
}

/// A single declarative event in a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: String,
    pub event_type: VerticalEvent,
    #[serde(default)]
    pub anchor: Anchor,
    pub delay: DelaySpec,
    #[serde(default)]
    pub condition: Option<EventCondition>,
    #[serde(default)]
    pub repeat: Option<RepeatPolicy>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

/// What an event's delay is measured relative to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// The entity's single anchor time (run entry).
    #[default]
    Start,
    /// Another event's actual scheduled time, by definition id.
    Event(String),
}

/// Time unit for delay values. Resolution bottoms out at whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    pub fn as_minutes(&self) -> i64 {
        match self {
            TimeUnit::Minutes => 1,
            TimeUnit::Hours => 60,
            TimeUnit::Days => 1_440,
            TimeUnit::Weeks => 10_080,
        }
    }

    pub fn to_duration(&self, value: i64) -> Duration {
        Duration::minutes(value * self.as_minutes())
    }
}

/// A declared timing rule, resolved to a concrete offset at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DelaySpec {
    Fixed {
        value: i64,
        unit: TimeUnit,
    },
    Uniform {
        min: i64,
        max: i64,
        unit: TimeUnit,
    },
    Normal {
        mean: f64,
        std_dev: f64,
        unit: TimeUnit,
    },
    /// First row whose condition matches wins; otherwise the fallback.
    Conditional {
        rows: Vec<DelayRow>,
        fallback: Box<DelaySpec>,
    },
}

impl DelaySpec {
    /// Fixed delay in days — the most common case in journey specs.
    pub fn days(value: i64) -> Self {
        DelaySpec::Fixed {
            value,
            unit: TimeUnit::Days,
        }
    }

    /// Structural validation: uniform bounds ordered, normal std_dev sane,
    /// conditional rows recursively valid.
    pub fn validate(&self) -> ForgeResult<()> {
        match self {
            DelaySpec::Fixed { .. } => Ok(()),
            DelaySpec::Uniform { min, max, .. } => {
                if min > max {
                    return Err(ForgeError::Specification(
                        "uniform delay has min > max".to_string(),
                    ));
                }
                Ok(())
            }
            DelaySpec::Normal { std_dev, .. } => {
                if *std_dev < 0.0 || !std_dev.is_finite() {
                    return Err(ForgeError::Specification(
                        "normal delay has invalid std_dev".to_string(),
                    ));
                }
                Ok(())
            }
            DelaySpec::Conditional { rows, fallback } => {
                for row in rows {
                    row.delay.validate()?;
                }
                fallback.validate()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayRow {
    pub condition: EventCondition,
    pub delay: DelaySpec,
}

/// Boolean expression tree over entity attributes and context variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventCondition {
    All {
        conditions: Vec<EventCondition>,
    },
    Any {
        conditions: Vec<EventCondition>,
    },
    Not {
        condition: Box<EventCondition>,
    },
    /// Entity attribute check. Absence of the attribute is an error unless
    /// `default` supplies a stand-in value.
    Attribute {
        key: String,
        op: ComparisonOp,
        value: serde_json::Value,
        #[serde(default)]
        default: Option<serde_json::Value>,
    },
    /// Engine-provided context variable check (`occurrence`, `elapsed_days`,
    /// `vertical`).
    Context {
        key: String,
        op: ComparisonOp,
        value: serde_json::Value,
    },
}

impl EventCondition {
    pub fn attribute(
        key: impl Into<String>,
        op: ComparisonOp,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        EventCondition::Attribute {
            key: key.into(),
            op,
            value: value.into(),
            default: None,
        }
    }

    pub fn context(
        key: impl Into<String>,
        op: ComparisonOp,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        EventCondition::Context {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn all(conditions: Vec<EventCondition>) -> Self {
        EventCondition::All { conditions }
    }

    pub fn any(conditions: Vec<EventCondition>) -> Self {
        EventCondition::Any { conditions }
    }

    pub fn negate(condition: EventCondition) -> Self {
        EventCondition::Not {
            condition: Box::new(condition),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    InList,
    IsSet,
}

/// How an occurred event re-enqueues itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatPolicy {
    pub interval: DelaySpec,
    #[serde(default)]
    pub max_occurrences: Option<u32>,
    #[serde(default)]
    pub until: Option<EventCondition>,
}

/// A parameter template entry — resolved when the event occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ParameterValue {
    Literal { value: serde_json::Value },
    AttributeRef { attribute: String },
    SkillRef { skill_id: String, lookup_key: String },
}

/// Status of a concrete timeline event. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Occurred,
    Skipped,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

/// A concrete event instance on one entity's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: Uuid,
    pub definition_id: String,
    pub event_type: VerticalEvent,
    pub scheduled_at: DateTime<Utc>,
    pub status: EventStatus,
    pub occurrence: u32,
    /// Resolved parameters; empty for skipped events.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// The event that caused this one to be scheduled — the anchor occurrence
    /// within a timeline, or the cross-vertical source event for triggered
    /// journeys.
    pub parent: Option<Uuid>,
}

/// Append-only, time-ordered event sequence owned by exactly one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    entity_id: EntityId,
    vertical: Vertical,
    anchor_time: DateTime<Utc>,
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new(entity_id: EntityId, vertical: Vertical, anchor_time: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            vertical,
            anchor_time,
            events: Vec::new(),
        }
    }

    /// Append an event. Events must arrive in non-decreasing scheduled time.
    pub fn push(&mut self, event: TimelineEvent) -> ForgeResult<()> {
        if let Some(last) = self.events.last() {
            if event.scheduled_at < last.scheduled_at {
                return Err(ForgeError::Internal(anyhow::anyhow!(
                    "timeline ordering violated: {} scheduled at {} after {}",
                    event.definition_id,
                    event.scheduled_at,
                    last.scheduled_at
                )));
            }
        }
        self.events.push(event);
        Ok(())
    }

    /// Flip still-pending events to `Cancelled`. Terminal statuses are
    /// immutable and untouched. Used when a run is torn down while an
    /// external collaborator still holds partially exported timelines.
    pub fn cancel_pending(&mut self) {
        for event in &mut self.events {
            if event.status == EventStatus::Pending {
                event.status = EventStatus::Cancelled;
            }
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn vertical(&self) -> Vertical {
        self.vertical
    }

    pub fn anchor_time(&self) -> DateTime<Utc> {
        self.anchor_time
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn occurred(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.events
            .iter()
            .filter(|e| e.status == EventStatus::Occurred)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl JourneySpecification {
    /// Load-time validation. Everything caught here is a setup-scoped
    /// `SpecificationError` that aborts the run before any entity work.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.events.is_empty() {
            return Err(ForgeError::Specification(format!(
                "journey `{}` has no events",
                self.name
            )));
        }

        let mut ids: HashSet<&str> = HashSet::new();
        for def in &self.events {
            if !ids.insert(def.id.as_str()) {
                return Err(ForgeError::Specification(format!(
                    "journey `{}`: duplicate event id `{}`",
                    self.name, def.id
                )));
            }
            if def.event_type.vertical() != self.vertical {
                return Err(ForgeError::Specification(format!(
                    "journey `{}`: event `{}` has type `{}` from vertical `{}`",
                    self.name,
                    def.id,
                    def.event_type.name(),
                    def.event_type.vertical()
                )));
            }
            if let Some(repeat) = &def.repeat {
                if repeat.max_occurrences.is_none() && repeat.until.is_none() {
                    return Err(ForgeError::Specification(format!(
                        "journey `{}`: event `{}` repeats without a terminal condition",
                        self.name, def.id
                    )));
                }
                if repeat.max_occurrences == Some(0) {
                    return Err(ForgeError::Specification(format!(
                        "journey `{}`: event `{}` repeat max_occurrences must be >= 1",
                        self.name, def.id
                    )));
                }
                validate_delay(&self.name, &def.id, &repeat.interval)?;
            }
            validate_delay(&self.name, &def.id, &def.delay)?;
        }

        for def in &self.events {
            if let Anchor::Event(anchor_id) = &def.anchor {
                if !ids.contains(anchor_id.as_str()) {
                    return Err(ForgeError::Specification(format!(
                        "journey `{}`: event `{}` anchors on unknown event `{}`",
                        self.name, def.id, anchor_id
                    )));
                }
            }
        }

        self.check_anchor_cycles()
    }

    pub fn definition(&self, id: &str) -> Option<&EventDefinition> {
        self.events.iter().find(|d| d.id == id)
    }

    /// Each event has exactly one anchor, so a cycle shows up as a parent
    /// chain that revisits an event before reaching `start`.
    fn check_anchor_cycles(&self) -> ForgeResult<()> {
        for def in &self.events {
            let mut visited: HashSet<&str> = HashSet::new();
            visited.insert(def.id.as_str());
            let mut current = def;
            while let Anchor::Event(anchor_id) = &current.anchor {
                if !visited.insert(anchor_id.as_str()) {
                    return Err(ForgeError::Specification(format!(
                        "journey `{}`: anchor cycle through event `{}`",
                        self.name, def.id
                    )));
                }
                match self.definition(anchor_id) {
                    Some(parent) => current = parent,
                    None => break, // unknown anchors reported above
                }
            }
        }
        Ok(())
    }
}

fn validate_delay(journey: &str, event: &str, delay: &DelaySpec) -> ForgeResult<()> {
    delay.validate().map_err(|err| {
        ForgeError::Specification(format!("journey `{journey}`: event `{event}`: {err}"))
    })
}
