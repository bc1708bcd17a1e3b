//! Skill/lookup resolution — an explicit registry mapping skill ids to
//! injected resolvers. Parameter templates reference external lookups by
//! token; nothing is resolved through ambient global state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use medforge_core::error::{ForgeError, ForgeResult};
use medforge_core::types::{EntityId, EntityState, Vertical};

use crate::types::ParameterValue;

/// Context handed to skill resolvers for one lookup.
pub struct SkillContext<'a> {
    pub entity_id: EntityId,
    pub vertical: Vertical,
    pub event_type: &'a str,
    pub state: &'a EntityState,
}

/// External lookup contract. Implementations are supplied by the embedding
/// application (code catalogs, reference data, attribute services).
pub trait SkillResolver: Send + Sync {
    fn resolve(
        &self,
        skill_id: &str,
        lookup_key: &str,
        ctx: &SkillContext<'_>,
    ) -> ForgeResult<Value>;
}

/// Registry of skill resolvers keyed by skill id.
#[derive(Default)]
pub struct SkillRegistry {
    resolvers: DashMap<String, Arc<dyn SkillResolver>>,
}

impl fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, skill_id: impl Into<String>, resolver: Arc<dyn SkillResolver>) {
        self.resolvers.insert(skill_id.into(), resolver);
    }

    pub fn resolve(
        &self,
        skill_id: &str,
        lookup_key: &str,
        ctx: &SkillContext<'_>,
    ) -> ForgeResult<Value> {
        let resolver =
            self.resolvers
                .get(skill_id)
                .ok_or_else(|| ForgeError::UnresolvedReference {
                    skill_id: skill_id.to_string(),
                    lookup_key: lookup_key.to_string(),
                    reason: "no resolver registered".to_string(),
                })?;
        resolver.resolve(skill_id, lookup_key, ctx)
    }

    /// Resolve a full parameter template for an occurred event.
    pub fn resolve_parameters(
        &self,
        template: &BTreeMap<String, ParameterValue>,
        ctx: &SkillContext<'_>,
    ) -> ForgeResult<BTreeMap<String, Value>> {
        let mut resolved = BTreeMap::new();
        for (name, param) in template {
            let value = match param {
                ParameterValue::Literal { value } => value.clone(),
                ParameterValue::AttributeRef { attribute } => ctx
                    .state
                    .get(attribute)
                    .cloned()
                    .ok_or_else(|| ForgeError::MissingAttribute {
                        attribute: attribute.clone(),
                    })?,
                ParameterValue::SkillRef {
                    skill_id,
                    lookup_key,
                } => self.resolve(skill_id, lookup_key, ctx)?,
            };
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }
}

/// Fixed lookup-table resolver, handy for tests and static reference data.
#[derive(Debug, Default)]
pub struct TableResolver {
    entries: std::collections::HashMap<String, Value>,
}

impl TableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, lookup_key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(lookup_key.into(), value.into());
        self
    }
}

impl SkillResolver for TableResolver {
    fn resolve(
        &self,
        skill_id: &str,
        lookup_key: &str,
        _ctx: &SkillContext<'_>,
    ) -> ForgeResult<Value> {
        self.entries
            .get(lookup_key)
            .cloned()
            .ok_or_else(|| ForgeError::UnresolvedReference {
                skill_id: skill_id.to_string(),
                lookup_key: lookup_key.to_string(),
                reason: "lookup key not found".to_string(),
            })
    }
}
