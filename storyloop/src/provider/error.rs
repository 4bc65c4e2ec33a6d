//! Error taxonomy for provider invocations.
//!
//! Every failure a backend reports is normalized into a [`ProviderError`]
//! tagged with an [`ErrorCategory`]. The category alone decides whether the
//! loop retries.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::process::ExecFailure;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fixed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    RateLimit,
    Timeout,
    Transient,
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Fatal => "fatal",
        }
    }

    /// Rate limits, timeouts and transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit | ErrorCategory::Timeout | ErrorCategory::Transient
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified provider failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub category: ErrorCategory,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl ProviderError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, message)
    }

    pub fn unknown_provider(name: &str, known: &[&str]) -> Self {
        Self::configuration(format!(
            "unknown provider \"{name}\" (known: {})",
            known.join(", ")
        ))
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// Classify a failed backend process run.
    ///
    /// `backend` names the CLI in the not-found message.
    pub fn from_exec(backend: &str, failure: ExecFailure) -> Self {
        let category = classify(&failure);
        match failure {
            ExecFailure::NotFound { .. } => {
                Self::new(category, format!("{backend} CLI binary not found in PATH"))
                    .with_source(failure)
            }
            // Message already carries the failure text; no source.
            other => Self::new(category, other.to_string()),
        }
    }
}

/// Map a process failure to exactly one category.
///
/// Precedence: cancellation/deadline, then a missing executable, then
/// keyword matching on the failure message.
pub fn classify(failure: &ExecFailure) -> ErrorCategory {
    match failure {
        ExecFailure::Cancelled | ExecFailure::DeadlineExceeded { .. } => ErrorCategory::Timeout,
        ExecFailure::NotFound { .. } => ErrorCategory::Configuration,
        other => classify_message(&other.to_string()),
    }
}

const AUTH_TOKENS: &[&str] = &["auth", "token", "unauthorized"];
const RATE_LIMIT_TOKENS: &[&str] = &["rate limit", "429"];
const TIMEOUT_TOKENS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const TRANSIENT_TOKENS: &[&str] = &["temporar", "unavailable", "try again"];

/// Keyword classification of a backend-reported message (case-insensitive).
pub fn classify_message(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    let contains_any = |tokens: &[&str]| tokens.iter().any(|token| message.contains(token));

    if contains_any(AUTH_TOKENS) {
        ErrorCategory::Authentication
    } else if contains_any(RATE_LIMIT_TOKENS) {
        ErrorCategory::RateLimit
    } else if contains_any(TIMEOUT_TOKENS) {
        ErrorCategory::Timeout
    } else if contains_any(TRANSIENT_TOKENS) {
        ErrorCategory::Transient
    } else {
        ErrorCategory::Fatal
    }
}
