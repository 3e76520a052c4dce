//! Domain Error Types
//!
//! Pure validation errors raised while parsing or checking roster values.
//! They carry no storage or transport concerns.

use thiserror::Error;

/// Errors produced by domain value parsing and validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Enrollment date was not of the form `Y/M/D`
    #[error("Invalid enrollment date: {0:?}")]
    InvalidEnrolDate(String),

    /// Schedule date was not of the form `YYYY-MM-DD`
    #[error("Invalid schedule date: {0:?}")]
    InvalidScheduleDate(String),

    /// National identity card failed the length or checksum rule
    #[error("Invalid identity card: {0}")]
    InvalidIdCard(String),

    /// Numeric status code outside the known range
    #[error("Unknown {kind} status code: {code}")]
    UnknownStatus { kind: &'static str, code: u8 },

    /// A required field was empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl DomainError {
    /// Create an unknown status error
    pub fn unknown_status(kind: &'static str, code: u8) -> Self {
        Self::UnknownStatus { kind, code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_input() {
        let err = DomainError::InvalidEnrolDate("2020".to_string());
        assert!(err.to_string().contains("2020"));

        let err = DomainError::unknown_status("student", 42);
        assert_eq!(err.to_string(), "Unknown student status code: 42");
    }
}
