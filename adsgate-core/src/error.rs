//! Error types for adsgate operations
//!
//! Every boundary call returns an explicit [`ClassifiedError`] so that retry
//! and reporting decisions are made from the [`ErrorClass`] alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failure; decides retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Credential invalid or expired.
    Auth,
    /// Local or remote rate limit hit.
    Quota,
    /// Malformed input or query.
    Validation,
    /// Network or server-side transient failure, including timeouts.
    Transient,
    /// Unrecoverable or unexpected.
    Fatal,
}

impl ErrorClass {
    /// Only quota and transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Quota | ErrorClass::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Auth => "AUTH",
            ErrorClass::Quota => "QUOTA",
            ErrorClass::Validation => "VALIDATION",
            ErrorClass::Transient => "TRANSIENT",
            ErrorClass::Fatal => "FATAL",
        }
    }

    /// What the caller can do about it.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorClass::Auth => {
                "Check that the credentials are valid and not expired, then re-authenticate."
            }
            ErrorClass::Quota => {
                "Wait before making more requests, reduce request frequency, or rely on cached reads."
            }
            ErrorClass::Validation => {
                "Review the input parameters and make sure they meet the API requirements."
            }
            ErrorClass::Transient => "This is a temporary error. Try again in a few moments.",
            ErrorClass::Fatal => "Check the request parameters; this failure will not resolve on retry.",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure with its classification and observability context attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} error: {message}")]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
    /// Platform error code, when the failure came from the remote API.
    pub code: Option<String>,
    /// Dotted path of the offending input field.
    pub field_path: Option<String>,
    /// Minimum wait the remote platform asked for.
    pub retry_after: Option<Duration>,
    /// Number of attempts made before surfacing; 0 if never executed.
    pub attempts: u32,
    /// Wall time spent across all attempts and backoff delays.
    pub elapsed: Duration,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            code: None,
            field_path: None,
            retry_after: None,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Auth, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Quota, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Attach the attempt count and cumulative elapsed time.
    pub fn with_attempts(mut self, attempts: u32, elapsed: Duration) -> Self {
        self.attempts = attempts;
        self.elapsed = elapsed;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }

    /// Render a message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        let mut out = format!("{} error: {}", self.class, self.message);
        if let Some(path) = &self.field_path {
            out.push_str(&format!("\nField: {}", path));
        }
        if self.attempts > 1 {
            out.push_str(&format!(
                "\nAttempts: {} over {:.1}s",
                self.attempts,
                self.elapsed.as_secs_f64()
            ));
        }
        out.push_str(&format!("\nSuggested action: {}", self.class.suggested_action()));
        if self.is_retryable() {
            out.push_str("\nThis error is retryable.");
        }
        out
    }
}

/// Raw failure metadata reported by the remote API client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteFailure {
    /// Transport-level status code, if any.
    pub status: Option<u16>,
    /// Platform error code, e.g. `RESOURCE_EXHAUSTED`.
    pub code: Option<String>,
    pub message: String,
    pub field_path: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// The failure recorded when a remote call exceeds its deadline.
    pub fn timeout(limit: Duration) -> Self {
        Self::new(format!("remote call timed out after {:?}", limit)).with_code("DEADLINE_EXCEEDED")
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, self.status) {
            (Some(code), _) => write!(f, "{}: {}", code, self.message),
            (None, Some(status)) => write!(f, "status {}: {}", status, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

const AUTH_CODES: &[&str] = &[
    "AUTHENTICATION",
    "AUTHORIZATION",
    "PERMISSION",
    "INVALID_CUSTOMER",
    "UNAUTHENTICATED",
];
const QUOTA_CODES: &[&str] = &["RATE_LIMIT", "RATE_EXCEEDED", "RESOURCE_EXHAUSTED", "QUOTA"];
const TRANSIENT_CODES: &[&str] = &[
    "INTERNAL_ERROR",
    "TRANSIENT",
    "DEADLINE_EXCEEDED",
    "UNAVAILABLE",
    "TIMEOUT",
];
const VALIDATION_CODES: &[&str] = &[
    "INVALID",
    "REQUIRED",
    "MALFORMED",
    "NOT_FOUND",
    "DOES_NOT_EXIST",
    "DUPLICATE",
];

/// Maps remote failure metadata onto an [`ErrorClass`].
///
/// Error codes win over status codes. Auth codes are checked first because
/// `INVALID_CUSTOMER` would otherwise read as a validation failure.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(failure: &RemoteFailure) -> ErrorClass {
        if let Some(code) = failure.code.as_deref() {
            let code = code.to_ascii_uppercase();
            let has = |set: &[&str]| set.iter().any(|c| code.contains(c));
            if has(AUTH_CODES) {
                return ErrorClass::Auth;
            }
            if has(QUOTA_CODES) {
                return ErrorClass::Quota;
            }
            if has(TRANSIENT_CODES) {
                return ErrorClass::Transient;
            }
            if has(VALIDATION_CODES) {
                return ErrorClass::Validation;
            }
        }

        match failure.status {
            Some(401) | Some(403) => ErrorClass::Auth,
            Some(429) => ErrorClass::Quota,
            Some(408) | Some(500) | Some(502) | Some(503) | Some(504) => ErrorClass::Transient,
            Some(s) if (400..500).contains(&s) => ErrorClass::Validation,
            _ => ErrorClass::Fatal,
        }
    }
}

impl From<RemoteFailure> for ClassifiedError {
    fn from(failure: RemoteFailure) -> Self {
        let class = ErrorClassifier::classify(&failure);
        ClassifiedError {
            class,
            message: failure.message,
            code: failure.code,
            field_path: failure.field_path,
            retry_after: failure.retry_after,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

/// A configuration that fails validation is the caller's to fix; retrying
/// cannot help.
impl From<ConfigError> for ClassifiedError {
    fn from(err: ConfigError) -> Self {
        let field = match &err {
            ConfigError::MissingRequired { field } | ConfigError::InvalidValue { field, .. } => {
                Some(field.clone())
            }
            _ => None,
        };
        let classified = ClassifiedError::validation(err.to_string()).with_code("INVALID_CONFIG");
        match field {
            Some(field) => classified.with_field_path(field),
            None => classified,
        }
    }
}

pub type AdsResult<T> = Result<T, ClassifiedError>;

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// TESTS
// =============================================================================
