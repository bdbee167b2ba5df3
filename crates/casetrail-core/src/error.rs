//! Error types for casetrail-core

use thiserror::Error;

/// Errors produced while constructing or validating event records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The application id was empty or whitespace-only
    #[error("application id must not be empty")]
    EmptyApplicationId,

    /// The event type string did not match any known variant
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// An event id failed to parse
    #[error("invalid event id: {0}")]
    InvalidEventId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EventError::UnknownEventType("REOPENED".into());
        assert!(err.to_string().contains("REOPENED"));

        let err = EventError::EmptyApplicationId;
        assert!(err.to_string().contains("application id"));
    }
}
