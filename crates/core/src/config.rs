use serde::{Deserialize, Serialize};

/// Root application configuration. Loaded from environment variables
/// with the prefix `MEDFORGE__` and TOML config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cohort: CohortConfig,
}

/// Policy knobs for timeline construction.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub negative_delay: NegativeDelayPolicy,
    #[serde(default = "default_repeat_safety_limit")]
    pub repeat_safety_limit: u32,
    #[serde(default = "default_max_timeline_events")]
    pub max_timeline_events: usize,
}

/// What to do when a delay draw resolves to a negative offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeDelayPolicy {
    /// Negative offsets are clamped to the anchor time.
    #[default]
    ClampToAnchor,
    /// The event may schedule before its anchor (pre-anchor timing).
    AllowPreAnchor,
    /// A negative draw fails the affected entity's timeline.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortConfig {
    #[serde(default = "default_cohort_size")]
    pub default_cohort_size: usize,
}

// Default functions
fn default_node_id() -> String {
    "forge-01".to_string()
}
fn default_repeat_safety_limit() -> u32 {
    1_000
}
fn default_max_timeline_events() -> usize {
    10_000
}
fn default_cohort_size() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            negative_delay: NegativeDelayPolicy::default(),
            repeat_safety_limit: default_repeat_safety_limit(),
            max_timeline_events: default_max_timeline_events(),
        }
    }
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            default_cohort_size: default_cohort_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            engine: EngineConfig::default(),
            cohort: CohortConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("MEDFORGE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.node_id, "forge-01");
        assert_eq!(cfg.engine.negative_delay, NegativeDelayPolicy::ClampToAnchor);
        assert_eq!(cfg.engine.repeat_safety_limit, 1_000);
        assert_eq!(cfg.cohort.default_cohort_size, 100);
    }

    #[test]
    fn test_negative_delay_policy_serde() {
        let policy: NegativeDelayPolicy = serde_json::from_str("\"allow_pre_anchor\"").unwrap();
        assert_eq!(policy, NegativeDelayPolicy::AllowPreAnchor);
        assert_eq!(
            serde_json::to_string(&NegativeDelayPolicy::Reject).unwrap(),
            "\"reject\""
        );
    }
}
