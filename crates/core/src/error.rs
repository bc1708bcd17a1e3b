use thiserror::Error;

pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Specification error: {0}")]
    Specification(String),

    #[error("Cyclic trigger chain: {0}")]
    CyclicTrigger(String),

    #[error("Missing attribute `{attribute}` with no default")]
    MissingAttribute { attribute: String },

    #[error("Unresolved reference: skill `{skill_id}`, key `{lookup_key}`: {reason}")]
    UnresolvedReference {
        skill_id: String,
        lookup_key: String,
        reason: String,
    },

    #[error("Unbounded recurrence for event `{definition_id}` after {occurrences} occurrences")]
    UnboundedRecurrence {
        definition_id: String,
        occurrences: u32,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
