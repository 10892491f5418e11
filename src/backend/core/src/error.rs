//! Error type shared by the breaker, the job coordinator and the HTTP surface.
//!
//! Every [`GuardError`] carries a stable [`ErrorCode`]. The code decides the
//! HTTP status, whether a caller may retry, and how loudly the error is
//! logged. Store outages and failed bulk transitions are `Critical`: they
//! leave the breaker record and the job table out of step.
//!
//! ```rust,ignore
//! use leadguard_core::error::{ErrorCode, ErrorContext, Result};
//!
//! fn load_payload(raw: &str) -> Result<serde_json::Value> {
//!     serde_json::from_str(raw).with_error_code(ErrorCode::DeserializationError)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

pub type Result<T> = std::result::Result<T, GuardError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable identifiers surfaced to API clients as `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // breaker
    StateStoreUnavailable,
    StateStoreCorrupted,
    CircuitOpen,

    // jobs
    BulkTransitionFailed,
    ResumeFailed,
    DispatchFailed,
    JobNotFound,

    // postgres
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseTransactionFailed,
    DuplicateRecord,

    // redis outside the breaker record
    RedisError,
    RedisConnectionFailed,

    // serde
    SerializationError,
    DeserializationError,

    // third-party services
    DependencyFailure,
    DependencyTimeout,

    ConfigurationError,
    InternalError,
}

impl ErrorCode {
    /// Numeric form; the hundreds block identifies the category.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::StateStoreUnavailable => 1000,
            Self::StateStoreCorrupted => 1001,
            Self::CircuitOpen => 1002,
            Self::BulkTransitionFailed => 1100,
            Self::ResumeFailed => 1101,
            Self::DispatchFailed => 1102,
            Self::JobNotFound => 1103,
            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseTransactionFailed => 2002,
            Self::DuplicateRecord => 2003,
            Self::RedisError => 2100,
            Self::RedisConnectionFailed => 2101,
            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::DependencyFailure => 3000,
            Self::DependencyTimeout => 3001,
            Self::ConfigurationError => 5000,
            Self::InternalError => 9000,
        }
    }

    pub const fn category(&self) -> &'static str {
        match self.numeric_code() / 100 {
            10 => "breaker",
            11 => "jobs",
            20 => "database",
            21 => "redis",
            22 => "serialization",
            30 => "dependency",
            50 => "configuration",
            _ => "internal",
        }
    }

    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::JobNotFound => StatusCode::NOT_FOUND,
            Self::DuplicateRecord => StatusCode::CONFLICT,
            Self::StateStoreUnavailable
            | Self::CircuitOpen
            | Self::DatabaseConnectionFailed
            | Self::RedisConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,
            Self::DependencyFailure => StatusCode::BAD_GATEWAY,
            Self::DependencyTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether repeating the same call can succeed without operator action.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StateStoreUnavailable
                | Self::DispatchFailed
                | Self::DatabaseConnectionFailed
                | Self::RedisError
                | Self::RedisConnectionFailed
                | Self::DependencyTimeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How loudly an error is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::JobNotFound | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::CircuitOpen
            | ErrorCode::DispatchFailed
            | ErrorCode::DependencyFailure
            | ErrorCode::DependencyTimeout => Self::Medium,

            // breaker and job table may disagree until someone intervenes
            ErrorCode::StateStoreUnavailable
            | ErrorCode::BulkTransitionFailed
            | ErrorCode::ResumeFailed
            | ErrorCode::DatabaseConnectionFailed
            | ErrorCode::RedisConnectionFailed
            | ErrorCode::InternalError => Self::Critical,

            _ => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured extras rendered under `error.details`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// What an operator should do next.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn entity(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.entity_type = Some(kind.into());
        self.entity_id = Some(id.into());
        self
    }

    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn suggest(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GuardError
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub struct GuardError {
    code: ErrorCode,
    /// Safe to return to API clients.
    user_message: Cow<'static, str>,
    /// Logged, never rendered.
    internal_message: Option<String>,
    details: ErrorDetails,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        match &self.internal_message {
            Some(internal) => write!(f, ": {}", internal),
            None => Ok(()),
        }
    }
}

impl GuardError {
    /// Builds the error and counts it in `leadguard_errors_total`.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let err = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };

        counter!(
            "leadguard_errors_total",
            "code" => code.to_string(),
            "category" => code.category(),
            "severity" => format!("{:?}", err.severity()),
            "retryable" => code.is_retryable().to_string(),
        )
        .increment(1);

        err
    }

    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(code, user_message);
        err.internal_message = Some(internal_message.into());
        err
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "Unexpected internal failure", message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Adds one key to `details.context`; values that fail to serialize are dropped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), value);
        }
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Emit one event at the level the severity calls for.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => error!(
                error_code = %code,
                category,
                message = %self.user_message,
                internal = ?self.internal_message,
                details = ?self.details,
                source = ?self.source,
                "CRITICAL ERROR"
            ),
            ErrorSeverity::High => error!(
                error_code = %code,
                category,
                message = %self.user_message,
                internal = ?self.internal_message,
                "guard operation failed"
            ),
            ErrorSeverity::Medium => warn!(
                error_code = %code,
                category,
                message = %self.user_message,
                "dependency or dispatch problem"
            ),
            ErrorSeverity::Low => debug!(
                error_code = %code,
                category,
                message = %self.user_message,
                "request rejected"
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP rendering
// ═══════════════════════════════════════════════════════════════════════════════

/// `{"success": false, "error": {...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&GuardError> for ErrorResponse {
    fn from(err: &GuardError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: err.code,
                numeric_code: err.code.numeric_code(),
                message: err.user_message.to_string(),
                details: (!err.details.is_empty()).then(|| err.details.clone()),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        self.log();
        (self.http_status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Converts foreign errors and missing values into [`GuardError`].
pub trait ErrorContext<T> {
    /// Wrap as an internal error with the given description.
    fn context(self, message: impl Into<String>) -> Result<T>;

    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| GuardError::internal(format!("{}: {}", message.into(), e)).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| GuardError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| GuardError::internal(message))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| GuardError::new(code, "Expected value was missing"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        let (code, message) = match &err {
            sqlx::Error::RowNotFound => (ErrorCode::JobNotFound, "Job row not found"),
            sqlx::Error::Database(db)
                if db
                    .constraint()
                    .is_some_and(|c| c.contains("unique") || c.ends_with("pkey")) =>
            {
                (ErrorCode::DuplicateRecord, "Job already exists")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Job store is unreachable",
            ),
            _ => (ErrorCode::DatabaseError, "Job store query failed"),
        };
        Self::with_internal(code, message, err.to_string()).with_source(err)
    }
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        let code = if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error()
        {
            ErrorCode::RedisConnectionFailed
        } else {
            ErrorCode::RedisError
        };
        Self::with_internal(code, "Redis command failed", err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        let code = match err.classify() {
            serde_json::error::Category::Io => ErrorCode::SerializationError,
            _ => ErrorCode::DeserializationError,
        };
        Self::with_internal(code, "Invalid JSON", err.to_string()).with_source(err)
    }
}

impl From<reqwest::Error> for GuardError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::DependencyTimeout
        } else {
            ErrorCode::DependencyFailure
        };
        Self::with_internal(code, "Third-party request failed", err.to_string()).with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for GuardError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::DependencyTimeout, "Operation timed out", err.to_string())
    }
}

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string()).with_source(err)
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Invalid configuration",
            err.to_string(),
        )
        .with_source(err)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl GuardError {
    /// The breaker record cannot be read or written. No transition happened.
    pub fn state_store_unavailable(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StateStoreUnavailable,
            "Circuit breaker state store is unavailable",
            reason,
        )
        .with_details(
            ErrorDetails::default()
                .entity("state_store", "circuit_breaker")
                .retry_after(5)
                .suggest("Check Redis connectivity and retry"),
        )
    }

    pub fn state_store_corrupted(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StateStoreCorrupted,
            "Circuit breaker state is unreadable",
            reason,
        )
    }

    /// The breaker is open but the pause transaction rolled back, so active
    /// jobs are still PENDING or PROCESSING.
    pub fn bulk_transition_failed(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::BulkTransitionFailed,
            "Failed to pause active jobs after the circuit breaker opened",
            reason,
        )
        .with_details(
            ErrorDetails::default()
                .suggest("Jobs may still be calling a failed dependency; investigate now"),
        )
    }

    /// The paused-job snapshot could not be read, so the close was not
    /// attempted and the circuit is still open.
    pub fn resume_failed(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ResumeFailed,
            "Paused jobs could not be read; circuit breaker left open",
            reason,
        )
        .with_details(
            ErrorDetails::default()
                .retry_after(5)
                .suggest("Retry the close once the job store recovers"),
        )
    }

    pub fn circuit_open(service: impl Into<String>) -> Self {
        let service = service.into();
        Self::new(
            ErrorCode::CircuitOpen,
            format!("Circuit breaker is open; call to {} was not attempted", service),
        )
        .with_context("service", &service)
    }

    pub fn dependency_failure(service: impl Into<String>, message: impl Into<String>) -> Self {
        let service = service.into();
        Self::new(
            ErrorCode::DependencyFailure,
            format!("Dependency {} failed: {}", service, message.into()),
        )
        .with_context("service", &service)
    }

    /// A paused job could not be dispatched. Recorded on the job and in the
    /// resume report; never returned from the batch.
    pub fn dispatch_failed(job_id: uuid::Uuid, reason: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::DispatchFailed, "Paused job could not be re-dispatched", reason)
            .with_details(ErrorDetails::default().entity("job", job_id.to_string()))
    }

    pub fn job_not_found(job_id: uuid::Uuid) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
            .with_details(ErrorDetails::default().entity("job", job_id.to_string()))
    }
}
