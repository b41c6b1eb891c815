use thiserror::Error;

use crate::types::RuleId;

pub type LoyaltyResult<T> = Result<T, LoyaltyError>;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("conflicting EXCLUSIVE rules in group '{conflict_group}': {rule_ids:?}")]
    Conflict {
        conflict_group: String,
        rule_ids: Vec<RuleId>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LoyaltyError {
    /// Shorthand for the common invalid-input case.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        LoyaltyError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for LoyaltyError {
    fn from(err: config::ConfigError) -> Self {
        LoyaltyError::Config(err.to_string())
    }
}
