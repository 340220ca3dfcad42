pub mod chat;
pub mod portfolio;
pub mod session;
pub mod settings;

use crate::api::ApiError;

/// Input rejected locally, before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Query cannot be empty")]
    EmptyQuery,
    #[error("Query is too long ({actual} characters, maximum is {max})")]
    QueryTooLong { actual: usize, max: usize },
    #[error("Clarification cannot be empty")]
    EmptyClarification,
    #[error("No clarification is pending")]
    NoPendingClarification,
    #[error("A query is already in progress")]
    Busy,
    #[error("Select a client first")]
    NoClientSelected,
    #[error("Invalid client id '{0}', expected CLT-XXX (e.g. CLT-001)")]
    InvalidClientId(String),
    #[error("Unknown client: {0}")]
    UnknownClient(String),
    #[error("Unknown setting key: {0}")]
    UnknownSetting(String),
    #[error("Invalid value '{value}' for setting {key}")]
    InvalidSetting { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("No active session for this conversation")]
    NoSession,
}
