//! Bulk generation — cohort orchestration over the journey engine, with
//! cross-vertical fan-out, partial-failure semantics, and aggregated results.

pub mod executor;
pub mod result;

pub use executor::{
    AttributeSource, CancelToken, CohortGenerator, GenerationProfile, StaticAttributeSource,
};
pub use result::{EntityFailure, EntityRecord, RunMetrics, RunResult};
