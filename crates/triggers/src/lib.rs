//! Cross-vertical triggers — registry, cycle-checked validation, and the
//! coordinator that correlates linked entities across verticals.

pub mod coordinator;
pub mod registry;

pub use coordinator::{CrossProductCoordinator, LinkedEntity, SpawnDirective};
pub use registry::{GenerationAction, RegisteredTrigger, TriggerRegistry};
