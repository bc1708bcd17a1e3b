//! Delay resolution — turns a declared timing rule into a concrete offset
//! using an occurrence-scoped seeded stream. No draw ever touches a shared
//! or global generator.

use chrono::Duration;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use medforge_core::config::NegativeDelayPolicy;
use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::types::EntityState;

use crate::evaluator::{ConditionEvaluator, EvalContext};
use crate::types::DelaySpec;

#[derive(Debug, Clone)]
pub struct DelayResolver {
    policy: NegativeDelayPolicy,
    evaluator: ConditionEvaluator,
}

impl DelayResolver {
    pub fn new(policy: NegativeDelayPolicy) -> Self {
        Self {
            policy,
            evaluator: ConditionEvaluator::new(),
        }
    }

    pub fn policy(&self) -> NegativeDelayPolicy {
        self.policy
    }

    /// Resolve a delay spec to an offset relative to its anchor. The caller
    /// provides the stream derived for this specific occurrence, so identical
    /// seeds reproduce identical offsets regardless of resolution order.
    pub fn resolve(
        &self,
        spec: &DelaySpec,
        state: &EntityState,
        ctx: &EvalContext,
        rng: &mut ChaCha8Rng,
    ) -> ForgeResult<Duration> {
        let offset = self.raw_offset(spec, state, ctx, rng)?;
        if offset < Duration::zero() {
            match self.policy {
                NegativeDelayPolicy::ClampToAnchor => {
                    debug!(minutes = offset.num_minutes(), "negative delay clamped");
                    Ok(Duration::zero())
                }
                NegativeDelayPolicy::AllowPreAnchor => Ok(offset),
                NegativeDelayPolicy::Reject => Err(ForgeError::Specification(format!(
                    "delay resolved to {} minutes under reject policy",
                    offset.num_minutes()
                ))),
            }
        } else {
            Ok(offset)
        }
    }

    fn raw_offset(
        &self,
        spec: &DelaySpec,
        state: &EntityState,
        ctx: &EvalContext,
        rng: &mut ChaCha8Rng,
    ) -> ForgeResult<Duration> {
        match spec {
            DelaySpec::Fixed { value, unit } => Ok(unit.to_duration(*value)),
            DelaySpec::Uniform { min, max, unit } => {
                let value = rng.gen_range(*min..=*max);
                Ok(unit.to_duration(value))
            }
            DelaySpec::Normal {
                mean,
                std_dev,
                unit,
            } => {
                let dist = Normal::new(*mean, *std_dev).map_err(|e| {
                    ForgeError::Specification(format!("invalid normal delay: {e}"))
                })?;
                let draw: f64 = dist.sample(rng);
                let minutes = (draw * unit.as_minutes() as f64).round() as i64;
                Ok(Duration::minutes(minutes))
            }
            DelaySpec::Conditional { rows, fallback } => {
                for row in rows {
                    if self.evaluator.evaluate(&row.condition, state, ctx)? {
                        return self.raw_offset(&row.delay, state, ctx, rng);
                    }
                }
                self.raw_offset(fallback, state, ctx, rng)
            }
        }
    }
}
