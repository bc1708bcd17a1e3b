use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local entity identifier within one vertical.
pub type EntityId = Uuid;

/// One synthetic-data product line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    HealthPlan,
    Clinical,
    Pharmacy,
    Trials,
}

impl Vertical {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vertical::HealthPlan => "health_plan",
            Vertical::Clinical => "clinical",
            Vertical::Pharmacy => "pharmacy",
            Vertical::Trials => "trials",
        }
    }
}

impl fmt::Display for Vertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kinds for health-plan members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberEvent {
    Enrollment,
    PlanSelection,
    Claim,
    PremiumPayment,
    CoverageChange,
    Disenrollment,
}

/// Event kinds for clinical patients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientEvent {
    Encounter,
    Diagnosis,
    Procedure,
    LabResult,
    Admission,
    Discharge,
    Referral,
}

/// Event kinds for pharmacy members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PharmacyEvent {
    Prescription,
    Fill,
    Refill,
    Reversal,
    PriorAuthorization,
}

/// Event kinds for trial subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialEvent {
    Screening,
    Enrollment,
    Randomization,
    StudyVisit,
    AdverseEvent,
    Completion,
    Withdrawal,
}

/// An event type, tagged by the vertical that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "vertical", content = "kind")]
pub enum VerticalEvent {
    Member(MemberEvent),
    Patient(PatientEvent),
    Pharmacy(PharmacyEvent),
    Trial(TrialEvent),
}

impl VerticalEvent {
    /// The vertical this event type belongs to.
    pub fn vertical(&self) -> Vertical {
        match self {
            VerticalEvent::Member(_) => Vertical::HealthPlan,
            VerticalEvent::Patient(_) => Vertical::Clinical,
            VerticalEvent::Pharmacy(_) => Vertical::Pharmacy,
            VerticalEvent::Trial(_) => Vertical::Trials,
        }
    }

    /// Stable snake_case name, used for trigger matching and deterministic
    /// tie-breaking. Names are unique within a vertical, not across verticals.
    pub fn name(&self) -> &'static str {
        match self {
            VerticalEvent::Member(e) => match e {
                MemberEvent::Enrollment => "enrollment",
                MemberEvent::PlanSelection => "plan_selection",
                MemberEvent::Claim => "claim",
                MemberEvent::PremiumPayment => "premium_payment",
                MemberEvent::CoverageChange => "coverage_change",
                MemberEvent::Disenrollment => "disenrollment",
            },
            VerticalEvent::Patient(e) => match e {
                PatientEvent::Encounter => "encounter",
                PatientEvent::Diagnosis => "diagnosis",
                PatientEvent::Procedure => "procedure",
                PatientEvent::LabResult => "lab_result",
                PatientEvent::Admission => "admission",
                PatientEvent::Discharge => "discharge",
                PatientEvent::Referral => "referral",
            },
            VerticalEvent::Pharmacy(e) => match e {
                PharmacyEvent::Prescription => "prescription",
                PharmacyEvent::Fill => "fill",
                PharmacyEvent::Refill => "refill",
                PharmacyEvent::Reversal => "reversal",
                PharmacyEvent::PriorAuthorization => "prior_authorization",
            },
            VerticalEvent::Trial(e) => match e {
                TrialEvent::Screening => "screening",
                TrialEvent::Enrollment => "enrollment",
                TrialEvent::Randomization => "randomization",
                TrialEvent::StudyVisit => "study_visit",
                TrialEvent::AdverseEvent => "adverse_event",
                TrialEvent::Completion => "completion",
                TrialEvent::Withdrawal => "withdrawal",
            },
        }
    }
}

/// Externally sampled attribute bag for one entity. The engine reads
/// attributes; it never generates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EntityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, convenient for profiles and tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }
}

/// Observability event emitted by generation components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub event_id: Uuid,
    pub kind: GenerationEventKind,
    pub run_id: String,
    pub entity_id: Option<EntityId>,
    pub vertical: Option<Vertical>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationEventKind {
    CohortStarted,
    EntityGenerated,
    EntityFailed,
    TriggerFired,
    EntityLinked,
    CohortCompleted,
}
