//! Error types for date-recur operations.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateRecurError {
    #[error("Malformed RRULE: {0}")]
    MalformedRule(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid {granularity} value '{input}': expected format {expected}")]
    InvalidGranularityInput {
        granularity: &'static str,
        input: String,
        expected: &'static str,
    },

    #[error("Invalid date value: {0}")]
    InvalidValue(String),

    /// An infinite rule was asked for occurrences with neither a range end nor a limit.
    #[error("Occurrence generation for an infinite rule requires a range end or a limit")]
    UnboundedGeneration,

    #[error("Occurrence store error: {0}")]
    Store(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DateRecurError {
    /// Whether the error stems from a value the user controls (and should be shown back
    /// to them as a validation message) rather than from a misuse of the API.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRule(_)
                | Self::InvalidTimezone(_)
                | Self::InvalidGranularityInput { .. }
                | Self::InvalidValue(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DateRecurError>;
