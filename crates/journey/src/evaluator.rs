//! Condition evaluation — a single recursive evaluator over the
//! `EventCondition` tree. Absence of a referenced attribute is a reportable
//! error, never a silent `false`.

use serde_json::Value;

use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::types::{EntityState, Vertical};

use crate::types::{ComparisonOp, EventCondition};

/// Engine-provided variables visible to `Context` leaves.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    pub vertical: Vertical,
    pub occurrence: u32,
    pub elapsed_days: i64,
}

impl EvalContext {
    pub fn at_start(vertical: Vertical) -> Self {
        Self {
            vertical,
            occurrence: 0,
            elapsed_days: 0,
        }
    }

    fn var(&self, key: &str) -> Option<Value> {
        match key {
            "occurrence" => Some(Value::from(self.occurrence)),
            "elapsed_days" => Some(Value::from(self.elapsed_days)),
            "vertical" => Some(Value::from(self.vertical.as_str())),
            _ => None,
        }
    }
}

/// Evaluates condition trees for a given entity and context.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        condition: &EventCondition,
        state: &EntityState,
        ctx: &EvalContext,
    ) -> ForgeResult<bool> {
        match condition {
            EventCondition::All { conditions } => {
                for c in conditions {
                    if !self.evaluate(c, state, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            EventCondition::Any { conditions } => {
                for c in conditions {
                    if self.evaluate(c, state, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            EventCondition::Not { condition } => Ok(!self.evaluate(condition, state, ctx)?),
            EventCondition::Attribute {
                key,
                op,
                value,
                default,
            } => {
                // Existence checks are the one place absence is an answer.
                if *op == ComparisonOp::IsSet {
                    return Ok(state.get(key).map(|v| !v.is_null()).unwrap_or(false));
                }
                let actual = match state.get(key) {
                    Some(v) => v.clone(),
                    None => match default {
                        Some(d) => d.clone(),
                        None => {
                            return Err(ForgeError::MissingAttribute {
                                attribute: key.clone(),
                            })
                        }
                    },
                };
                Ok(compare_values(&actual, op, value))
            }
            EventCondition::Context { key, op, value } => {
                let actual = ctx.var(key).ok_or_else(|| ForgeError::MissingAttribute {
                    attribute: format!("context.{key}"),
                })?;
                Ok(compare_values(&actual, op, value))
            }
        }
    }
}

#[allow(clippy::unnecessary_map_or)]
pub fn compare_values(actual: &Value, op: &ComparisonOp, expected: &Value) -> bool {
    match op {
        ComparisonOp::Equals => actual == expected,
        ComparisonOp::NotEquals => actual != expected,
        ComparisonOp::GreaterThan => {
            numeric_cmp(actual, expected).map_or(false, |o| o == std::cmp::Ordering::Greater)
        }
        ComparisonOp::GreaterThanOrEqual => {
            numeric_cmp(actual, expected).map_or(false, |o| o != std::cmp::Ordering::Less)
        }
        ComparisonOp::LessThan => {
            numeric_cmp(actual, expected).map_or(false, |o| o == std::cmp::Ordering::Less)
        }
        ComparisonOp::LessThanOrEqual => {
            numeric_cmp(actual, expected).map_or(false, |o| o != std::cmp::Ordering::Greater)
        }
        ComparisonOp::Contains => actual
            .as_str()
            .zip(expected.as_str())
            .map_or(false, |(a, e)| a.contains(e)),
        ComparisonOp::InList => expected
            .as_array()
            .map_or(false, |list| list.contains(actual)),
        ComparisonOp::IsSet => !actual.is_null(),
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let a_num = a.as_f64()?;
    let b_num = b.as_f64()?;
    a_num.partial_cmp(&b_num)
}
