//! Errors raised while building or parsing domain records.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejected input on a domain record.
///
/// Remote-service and storage failures have their own error types in the
/// crates that talk to those systems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A record field was rejected (blank category name, ...).
    #[error("invalid record: {0}")]
    Validation(String),

    /// An id string did not parse as a UUID.
    #[error("invalid id: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn invalid_id(reason: impl Into<String>) -> Self {
        Self::InvalidId(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_reason() {
        assert_eq!(
            DomainError::validation("name must not be empty").to_string(),
            "invalid record: name must not be empty"
        );
        assert_eq!(
            DomainError::invalid_id("UserId: bad length").to_string(),
            "invalid id: UserId: bad length"
        );
    }
}
