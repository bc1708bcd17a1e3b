//! Journey simulation — turns declarative event specifications into
//! deterministic, time-ordered entity timelines with probabilistic delays,
//! condition gating, and repeat policies.

pub mod delay;
pub mod engine;
pub mod evaluator;
pub mod skills;
pub mod types;

pub use engine::JourneyEngine;
pub use evaluator::{ConditionEvaluator, EvalContext};
pub use skills::{SkillRegistry, SkillResolver};
