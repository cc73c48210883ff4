//! Failure taxonomy for classifier calls.
//!
//! The remote classifier exposes no structured error codes, so
//! [`TextFailureClassifier`] reads the failure text against an ordered list of
//! case-insensitive rules. A client that can report structured errors plugs in
//! its own [`FailureClassifier`] instead.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of failure kinds surfaced to users.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ServiceUnavailable,
    RateLimited,
    AuthError,
    Timeout,
    ParseError,
    UnknownError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::ServiceUnavailable,
        ErrorKind::RateLimited,
        ErrorKind::AuthError,
        ErrorKind::Timeout,
        ErrorKind::ParseError,
        ErrorKind::UnknownError,
    ];

    /// Fixed user-facing copy for this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::ServiceUnavailable => {
                "The categorization service is temporarily unavailable. Please try again in a few minutes."
            }
            ErrorKind::RateLimited => {
                "The categorization service is receiving too many requests. Please wait a moment and try again."
            }
            ErrorKind::AuthError => {
                "The categorization service could not be authenticated. Please contact support."
            }
            ErrorKind::Timeout => {
                "The categorization service took too long to respond. Please try again."
            }
            ErrorKind::ParseError => {
                "The categorization service returned an unexpected response. Please try again."
            }
            ErrorKind::UnknownError => {
                "Something went wrong while categorizing your transactions. Please try again."
            }
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::AuthError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::AuthError => "AUTH_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(code)
    }
}

/// A classified failure, as stored for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub code: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    /// Suggestions persisted by the job before it stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions_saved: Option<usize>,
}

impl ProcessingError {
    pub fn new(code: ErrorKind) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            retryable: code.is_retryable(),
            timestamp: Utc::now(),
            suggestions_saved: None,
        }
    }

    /// Annotate with the number of suggestions already saved (ignored when zero).
    pub fn with_suggestions_saved(self, saved: usize) -> Self {
        Self {
            suggestions_saved: (saved > 0).then_some(saved),
            ..self
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ErrorKind::RateLimited
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(saved) = self.suggestions_saved {
            write!(f, " ({saved} suggestion(s) were saved before the failure)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProcessingError {}

/// Maps an arbitrary failure to a [`ProcessingError`]. Must be total.
pub trait FailureClassifier: Send + Sync + 'static {
    fn classify(&self, failure: &dyn fmt::Display) -> ProcessingError;
}

/// Substring rules checked in order against lowercased failure text.
const TEXT_RULES: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Timeout,
        &["deadline exceeded", "context canceled", "cancelled", "canceled"],
    ),
    (
        ErrorKind::RateLimited,
        &[
            "rate limit",
            "rate_limit",
            "ratelimit",
            "quota",
            "429",
            "too many requests",
            "resource exhausted",
            "resource_exhausted",
        ],
    ),
    (
        ErrorKind::AuthError,
        &[
            "401",
            "403",
            "invalid api key",
            "api key not valid",
            "unauthorized",
            "authentication",
            "forbidden",
        ],
    ),
    (
        ErrorKind::ServiceUnavailable,
        &[
            "connection",
            "network",
            "dial",
            "timeout",
            "unavailable",
            "503",
            "no such host",
        ],
    ),
    (
        ErrorKind::ParseError,
        &["parse", "json", "unmarshal", "decode"],
    ),
];

/// Heuristic classifier over the failure's rendered text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFailureClassifier;

impl TextFailureClassifier {
    pub fn kind_of(text: &str) -> ErrorKind {
        let lowered = text.to_lowercase();
        TEXT_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lowered.contains(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::UnknownError)
    }
}

impl FailureClassifier for TextFailureClassifier {
    fn classify(&self, failure: &dyn fmt::Display) -> ProcessingError {
        ProcessingError::new(Self::kind_of(&failure.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> ProcessingError {
        TextFailureClassifier.classify(&text)
    }

    #[test]
    fn representative_texts_map_to_documented_kinds() {
        let cases = [
            ("context deadline exceeded", ErrorKind::Timeout, true),
            ("request Cancelled by caller", ErrorKind::Timeout, true),
            ("429 too many requests", ErrorKind::RateLimited, true),
            ("RESOURCE_EXHAUSTED: quota exceeded", ErrorKind::RateLimited, true),
            ("401 unauthorized", ErrorKind::AuthError, false),
            ("Invalid API key provided", ErrorKind::AuthError, false),
            ("connection refused", ErrorKind::ServiceUnavailable, true),
            ("dial tcp: i/o timeout", ErrorKind::ServiceUnavailable, true),
            ("503 Service Unavailable", ErrorKind::ServiceUnavailable, true),
            ("invalid json", ErrorKind::ParseError, true),
            ("failed to unmarshal response", ErrorKind::ParseError, true),
            ("boom", ErrorKind::UnknownError, true),
        ];

        for (text, kind, retryable) in cases {
            let err = classify(text);
            assert_eq!(err.code, kind, "{text}");
            assert_eq!(err.retryable, retryable, "{text}");
        }
    }

    #[test]
    fn earlier_rules_win() {
        // Mentions both a rate limit and a connection problem.
        assert_eq!(
            classify("connection reset: 429 rate limit").code,
            ErrorKind::RateLimited
        );
        // Deadline beats the generic timeout wording.
        assert_eq!(
            classify("timeout: context deadline exceeded").code,
            ErrorKind::Timeout
        );
    }

    #[test]
    fn message_comes_from_the_fixed_table() {
        for kind in ErrorKind::ALL {
            let err = ProcessingError::new(kind);
            assert_eq!(err.message, kind.message());
        }
        assert_ne!(classify("boom").message, "boom");
    }

    #[test]
    fn saved_count_is_only_recorded_when_positive() {
        let err = ProcessingError::new(ErrorKind::RateLimited);
        assert_eq!(err.clone().with_suggestions_saved(0).suggestions_saved, None);

        let annotated = err.with_suggestions_saved(12);
        assert_eq!(annotated.suggestions_saved, Some(12));
        assert!(annotated.to_string().contains("12 suggestion(s)"));
    }
}
