//! Error taxonomy shared by every Vigil component.
//!
//! # Error Handling Architecture
//!
//! All failures raised by the circuit breaker, the resilient client, the
//! monitor and the recovery orchestrator are an [`AppError`]: one struct of
//! common fields plus a closed set of [`ErrorDetails`] variants.
//!
//! - **`ErrorKind`** is the variant discriminant. It is fixed at construction
//!   and is the key the error monitor aggregates by.
//! - **`ErrorSeverity`** is a pure function of the variant and its
//!   status-like fields. It is recomputed whenever a builder method touches
//!   one of those fields, so it can never drift from the details.
//! - **`ErrorClassification`** exposes retryability and criticality so
//!   retry policies can stay generic.
//!
//! ## Severity Rules
//!
//! | Kind | Default | Escalation |
//! |------|---------|------------|
//! | `NetworkError` | HIGH | - |
//! | `APIError` | MEDIUM | 5xx → CRITICAL, 401/403 → HIGH |
//! | `ValidationError` | LOW | - |
//! | `AuthenticationError` / `AuthorizationError` | HIGH | - |
//! | `DatabaseError` | HIGH | `can_retry = false` → CRITICAL |
//! | `ExternalServiceError` | MEDIUM | response status ≥ 500 → HIGH |
//! | `UserOperationError` | MEDIUM | - |
//! | `CircuitOpenError` | MEDIUM | - |
//! | `ConfigurationError` | HIGH | - |
//!
//! ## Examples
//!
//! ```rust
//! use vigil_common::error::{AppError, ErrorKind, ErrorSeverity};
//!
//! let err = AppError::database("timeout", "read", "usersdb", true);
//! assert_eq!(err.kind(), ErrorKind::Database);
//! assert_eq!(err.severity(), ErrorSeverity::High);
//!
//! let err = AppError::database("timeout", "read", "usersdb", false);
//! assert_eq!(err.severity(), ErrorSeverity::Critical);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard result type using [`AppError`]
pub type AppResult<T> = Result<T, AppError>;

/// Shared, type-erased originating error.
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Severity used for routing: log verbosity and alert eligibility.
///
/// Severity never changes control flow on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    /// Expected, user-correctable input problems
    Low,
    /// Failures that degrade a single operation
    Medium,
    /// Failures of a dependency or of access control
    High,
    /// Faults that need immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Every severity, lowest first.
    pub const ALL: [ErrorSeverity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Upper-case name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of [`ErrorDetails`]; one variant per details variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Api,
    Validation,
    Authentication,
    Authorization,
    Database,
    ExternalService,
    UserOperation,
    CircuitOpen,
    Configuration,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 10] = [
        Self::Network,
        Self::Api,
        Self::Validation,
        Self::Authentication,
        Self::Authorization,
        Self::Database,
        Self::ExternalService,
        Self::UserOperation,
        Self::CircuitOpen,
        Self::Configuration,
    ];

    /// Stable name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NetworkError",
            Self::Api => "APIError",
            Self::Validation => "ValidationError",
            Self::Authentication => "AuthenticationError",
            Self::Authorization => "AuthorizationError",
            Self::Database => "DatabaseError",
            Self::ExternalService => "ExternalServiceError",
            Self::UserOperation => "UserOperationError",
            Self::CircuitOpen => "CircuitOpenError",
            Self::Configuration => "ConfigurationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a network-level operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFailure {
    /// The call did not complete before its deadline.
    Timeout,
    /// The peer could not be reached or the connection broke.
    Connection,
    /// Every retry attempt failed at the network level.
    RetriesExhausted,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Connection => f.write_str("connection"),
            Self::RetriesExhausted => f.write_str("retries_exhausted"),
        }
    }
}

/// Kind-specific fields of an [`AppError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetails {
    /// Timeout, refused or broken connection, or exhausted retries
    Network {
        failure: NetworkFailure,
        /// Attempts made before giving up (1 when no retry happened).
        attempts: u32,
    },
    /// Non-2xx HTTP response
    Api {
        status_code: u16,
        endpoint: String,
    },
    /// Rejected input; `value` is the offending value when known
    Validation {
        field: String,
        value: Option<String>,
    },
    /// Missing or invalid credentials
    Authentication,
    /// Authenticated caller lacks a permission
    Authorization {
        required_permission: Option<String>,
    },
    /// Failed database operation
    Database {
        operation: String,
        database: String,
        table: Option<String>,
        can_retry: bool,
    },
    /// Third-party dependency failure
    ExternalService {
        service_name: String,
        endpoint: Option<String>,
        response_status: Option<u16>,
        response_body: Option<String>,
    },
    /// A user-initiated operation that could not complete
    UserOperation {
        operation: String,
        resource_type: String,
        resource_id: Option<String>,
        user_id: Option<String>,
    },
    /// Call refused by an open circuit breaker
    CircuitOpen {
        resource: String,
    },
    /// Invalid or missing setting
    Configuration {
        setting: String,
    },
}

impl ErrorDetails {
    /// Discriminant of this variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Api { .. } => ErrorKind::Api,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Authentication => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Database { .. } => ErrorKind::Database,
            Self::ExternalService { .. } => ErrorKind::ExternalService,
            Self::UserOperation { .. } => ErrorKind::UserOperation,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Severity derived from the variant and its status-like fields.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Network { .. } => ErrorSeverity::High,
            Self::Api { status_code, .. } => match *status_code {
                500.. => ErrorSeverity::Critical,
                401 | 403 => ErrorSeverity::High,
                _ => ErrorSeverity::Medium,
            },
            Self::Validation { .. } => ErrorSeverity::Low,
            Self::Authentication | Self::Authorization { .. } => ErrorSeverity::High,
            Self::Database { can_retry: true, .. } => ErrorSeverity::High,
            Self::Database { can_retry: false, .. } => ErrorSeverity::Critical,
            Self::ExternalService { response_status: Some(status), .. } if *status >= 500 => {
                ErrorSeverity::High
            }
            Self::ExternalService { .. } => ErrorSeverity::Medium,
            Self::UserOperation { .. } => ErrorSeverity::Medium,
            Self::CircuitOpen { .. } => ErrorSeverity::Medium,
            Self::Configuration { .. } => ErrorSeverity::High,
        }
    }

    /// Pre-canned, non-technical message suitable for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network { failure: NetworkFailure::Timeout, .. } => {
                "The request took too long to complete. Please try again."
            }
            Self::Network { .. } => {
                "We couldn't reach the service. Please check your connection and try again."
            }
            Self::Api { status_code, .. } => match *status_code {
                401 => "Your session has expired. Please sign in again.",
                403 => "You don't have permission to do that.",
                404 => "We couldn't find what you were looking for.",
                429 => "Too many requests. Please wait a moment and try again.",
                500.. => "The service is having trouble right now. Please try again later.",
                _ => "The request couldn't be completed. Please try again.",
            },
            Self::Validation { .. } => "Some of the information provided isn't valid. Please review it and try again.",
            Self::Authentication => "Please sign in to continue.",
            Self::Authorization { .. } => "You don't have permission to do that.",
            Self::Database { .. } => "We couldn't access your data right now. Please try again later.",
            Self::ExternalService { .. } => {
                "A service we rely on is unavailable. Please try again later."
            }
            Self::UserOperation { .. } => "That action couldn't be completed.",
            Self::CircuitOpen { .. } => {
                "This feature is temporarily unavailable. Please try again shortly."
            }
            Self::Configuration { .. } => {
                "The application isn't set up correctly. Please contact support."
            }
        }
    }
}

/// A classified, immutable application error.
///
/// Fields are private: once constructed (and optionally refined with the
/// consuming `with_*` builders) an error cannot change its kind, and its
/// context is only ever handed out as a copy.
#[derive(Clone)]
pub struct AppError {
    details: ErrorDetails,
    message: String,
    severity: ErrorSeverity,
    context: BTreeMap<String, String>,
    cause: Option<SharedCause>,
    timestamp: DateTime<Utc>,
}

impl AppError {
    /// Build an error from raw details, stamped with the current time.
    pub fn new<M: Into<String>>(details: ErrorDetails, message: M) -> Self {
        let severity = details.severity();
        Self {
            details,
            message: message.into(),
            severity,
            context: BTreeMap::new(),
            cause: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a network error
    pub fn network<M: Into<String>>(failure: NetworkFailure, message: M) -> Self {
        Self::new(ErrorDetails::Network { failure, attempts: 1 }, message)
    }

    /// Create a network timeout error
    pub fn timeout(after: Duration) -> Self {
        Self::network(NetworkFailure::Timeout, format!("operation timed out after {after:?}"))
    }

    /// Create a connection-level network error
    pub fn connection<M: Into<String>>(message: M) -> Self {
        Self::network(NetworkFailure::Connection, message)
    }

    /// Network error raised after `attempts` failed tries, wrapping the last
    /// failure as its cause.
    pub fn retries_exhausted(attempts: u32, last: AppError) -> Self {
        let message = format!("all {attempts} attempts failed: {}", last.message);
        Self::new(
            ErrorDetails::Network { failure: NetworkFailure::RetriesExhausted, attempts },
            message,
        )
        .with_cause(last)
    }

    /// Create an API error for a non-2xx response
    pub fn api<E: Into<String>, M: Into<String>>(status_code: u16, endpoint: E, message: M) -> Self {
        Self::new(ErrorDetails::Api { status_code, endpoint: endpoint.into() }, message)
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::new(ErrorDetails::Validation { field: field.into(), value: None }, message)
    }

    /// Create a validation error carrying the rejected value
    pub fn validation_with_value<F: Into<String>, V: Into<String>, M: Into<String>>(
        field: F,
        value: V,
        message: M,
    ) -> Self {
        Self::new(
            ErrorDetails::Validation { field: field.into(), value: Some(value.into()) },
            message,
        )
    }

    /// Response body could not be decoded into the expected type.
    pub fn malformed_payload<E>(endpoint: &str, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::validation("payload", format!("malformed response payload from {endpoint}: {source}"))
            .with_context("endpoint", endpoint)
            .with_cause(source)
    }

    /// Create an authentication error (missing or invalid credentials)
    pub fn authentication<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorDetails::Authentication, message)
    }

    /// Create an authorization error (authenticated but not permitted)
    pub fn authorization<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorDetails::Authorization { required_permission: None }, message)
    }

    /// Authorization error naming the missing permission
    pub fn authorization_requires<P: Into<String>, M: Into<String>>(
        permission: P,
        message: M,
    ) -> Self {
        Self::new(
            ErrorDetails::Authorization { required_permission: Some(permission.into()) },
            message,
        )
    }

    /// Create a database error
    pub fn database<M, O, D>(message: M, operation: O, database: D, can_retry: bool) -> Self
    where
        M: Into<String>,
        O: Into<String>,
        D: Into<String>,
    {
        Self::new(
            ErrorDetails::Database {
                operation: operation.into(),
                database: database.into(),
                table: None,
                can_retry,
            },
            message,
        )
    }

    /// Create an external service error
    pub fn external_service<S: Into<String>, M: Into<String>>(service_name: S, message: M) -> Self {
        Self::new(
            ErrorDetails::ExternalService {
                service_name: service_name.into(),
                endpoint: None,
                response_status: None,
                response_body: None,
            },
            message,
        )
    }

    /// Create a user operation error
    pub fn user_operation<O, R, M>(operation: O, resource_type: R, message: M) -> Self
    where
        O: Into<String>,
        R: Into<String>,
        M: Into<String>,
    {
        Self::new(
            ErrorDetails::UserOperation {
                operation: operation.into(),
                resource_type: resource_type.into(),
                resource_id: None,
                user_id: None,
            },
            message,
        )
    }

    /// Fail-fast rejection by an open circuit breaker
    pub fn circuit_open<R: Into<String>>(resource: R) -> Self {
        let resource = resource.into();
        let message = format!("circuit breaker for '{resource}' is open");
        Self::new(ErrorDetails::CircuitOpen { resource }, message)
    }

    /// Programming or configuration fault
    pub fn configuration<S: Into<String>, M: Into<String>>(setting: S, message: M) -> Self {
        Self::new(ErrorDetails::Configuration { setting: setting.into() }, message)
    }

    // ------------------------------------------------------------------
    // Construction-time refinements
    // ------------------------------------------------------------------

    /// Attach a context entry.
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Wrap the originating error.
    pub fn with_cause<E>(self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.with_shared_cause(Arc::new(cause))
    }

    /// Wrap an already shared originating error.
    pub fn with_shared_cause(mut self, cause: SharedCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Override the occurrence timestamp (useful with a mock clock).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Record how many attempts a network error took. No-op for other kinds.
    pub fn with_attempts(mut self, count: u32) -> Self {
        if let ErrorDetails::Network { attempts, .. } = &mut self.details {
            *attempts = count;
        }
        self
    }

    /// Set the table of a database error. No-op for other kinds.
    pub fn with_table<T: Into<String>>(mut self, name: T) -> Self {
        if let ErrorDetails::Database { table, .. } = &mut self.details {
            *table = Some(name.into());
        }
        self
    }

    /// Set the endpoint of an external service error. No-op for other kinds.
    pub fn with_endpoint<E: Into<String>>(mut self, value: E) -> Self {
        if let ErrorDetails::ExternalService { endpoint, .. } = &mut self.details {
            *endpoint = Some(value.into());
        }
        self
    }

    /// Set the upstream response of an external service error. No-op for
    /// other kinds.
    pub fn with_response<B: Into<String>>(mut self, status: u16, body: B) -> Self {
        if let ErrorDetails::ExternalService { response_status, response_body, .. } =
            &mut self.details
        {
            *response_status = Some(status);
            *response_body = Some(body.into());
        }
        self.severity = self.details.severity();
        self
    }

    /// Set the resource id of a user operation error. No-op for other kinds.
    pub fn with_resource_id<I: Into<String>>(mut self, id: I) -> Self {
        if let ErrorDetails::UserOperation { resource_id, .. } = &mut self.details {
            *resource_id = Some(id.into());
        }
        self
    }

    /// Set the acting user of a user operation error. No-op for other kinds.
    pub fn with_user_id<I: Into<String>>(mut self, id: I) -> Self {
        if let ErrorDetails::UserOperation { user_id, .. } = &mut self.details {
            *user_id = Some(id.into());
        }
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Kind of this error; fixed at construction.
    pub fn kind(&self) -> ErrorKind {
        self.details.kind()
    }

    /// Kind-specific fields.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Technical message for logs.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Severity derived from the details.
    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// Human-facing message for this error.
    pub fn user_message(&self) -> &'static str {
        self.details.user_message()
    }

    /// A copy of the context map; the error's own map is never exposed.
    pub fn context(&self) -> HashMap<String, String> {
        self.context.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Look up a single context entry.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Originating error, if one was attached.
    pub fn cause(&self) -> Option<&SharedCause> {
        self.cause.as_ref()
    }

    /// When the error occurred.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// HTTP-like status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match &self.details {
            ErrorDetails::Api { status_code, .. } => Some(*status_code),
            ErrorDetails::ExternalService { response_status, .. } => *response_status,
            _ => None,
        }
    }

    /// Failure reason of a network error; `None` for other kinds.
    pub fn network_failure(&self) -> Option<NetworkFailure> {
        match &self.details {
            ErrorDetails::Network { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    /// Serializable snapshot for logs and reports.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            severity: self.severity,
            message: self.message.clone(),
            user_message: self.user_message().to_string(),
            details: self.details.clone(),
            context: self.context.clone(),
            cause: self.cause.as_ref().map(ToString::to_string),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind())
            .field("severity", &self.severity)
            .field("message", &self.message)
            .field("details", &self.details)
            .field("context", &self.context)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            ErrorDetails::Api { status_code, endpoint } => {
                write!(f, "{}: {} (status {} from {})", self.kind(), self.message, status_code, endpoint)
            }
            ErrorDetails::Network { failure, attempts } if *attempts > 1 => {
                write!(f, "{} [{}]: {} after {} attempts", self.kind(), failure, self.message, attempts)
            }
            ErrorDetails::Network { failure, .. } => {
                write!(f, "{} [{}]: {}", self.kind(), failure, self.message)
            }
            _ => write!(f, "{}: {}", self.kind(), self.message),
        }
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("payload", err.to_string()).with_cause(err)
    }
}

/// Serializable view of an [`AppError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub user_message: String,
    pub details: ErrorDetails,
    pub context: BTreeMap<String, String>,
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Standard classification interface for errors.
///
/// Retry policies and alerting only depend on this trait, never on the
/// concrete error type.
pub trait ErrorClassification {
    /// Whether repeating the failed operation may succeed.
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    /// Whether the error needs immediate attention.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Suggested delay before retrying, if the error carries one.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl ErrorClassification for AppError {
    fn is_retryable(&self) -> bool {
        match &self.details {
            ErrorDetails::Network { failure, .. } => *failure != NetworkFailure::RetriesExhausted,
            ErrorDetails::Api { status_code, .. } => {
                matches!(*status_code, 408 | 429) || *status_code >= 500
            }
            ErrorDetails::Database { can_retry, .. } => *can_retry,
            ErrorDetails::ExternalService { response_status, .. } => {
                !matches!(response_status, Some(status) if *status < 500)
            }
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    fn retry_after(&self) -> Option<Duration> {
        self.context_value("retry_after_ms")
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the error taxonomy
    //!
    //! Covers the severity table, user messages, context immutability and
    //! cause chaining.

    use super::*;

    #[test]
    fn test_default_severities() {
        assert_eq!(AppError::connection("refused").severity(), ErrorSeverity::High);
        assert_eq!(AppError::validation("email", "missing @").severity(), ErrorSeverity::Low);
        assert_eq!(AppError::authentication("no token").severity(), ErrorSeverity::High);
        assert_eq!(AppError::authorization("read-only").severity(), ErrorSeverity::High);
        assert_eq!(AppError::external_service("stripe", "down").severity(), ErrorSeverity::Medium);
        assert_eq!(AppError::circuit_open("users-api").severity(), ErrorSeverity::Medium);
        assert_eq!(
            AppError::user_operation("delete", "invoice", "locked").severity(),
            ErrorSeverity::Medium
        );
    }

    #[test]
    fn test_api_severity_follows_status() {
        assert_eq!(AppError::api(503, "/users", "unavailable").severity(), ErrorSeverity::Critical);
        assert_eq!(AppError::api(500, "/users", "boom").severity(), ErrorSeverity::Critical);
        assert_eq!(AppError::api(401, "/users", "expired").severity(), ErrorSeverity::High);
        assert_eq!(AppError::api(403, "/users", "denied").severity(), ErrorSeverity::High);
        assert_eq!(AppError::api(404, "/users", "missing").severity(), ErrorSeverity::Medium);
        assert_eq!(AppError::api(422, "/users", "bad").severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_database_retryability_escalates() {
        let retryable = AppError::database("timeout", "read", "usersdb", true);
        assert_eq!(retryable.severity(), ErrorSeverity::High);
        assert!(retryable.is_retryable());

        let fatal = AppError::database("timeout", "read", "usersdb", false).with_table("users");
        assert_eq!(fatal.severity(), ErrorSeverity::Critical);
        assert!(fatal.is_critical());
        assert!(matches!(
            fatal.details(),
            ErrorDetails::Database { table: Some(table), .. } if table == "users"
        ));
    }

    #[test]
    fn test_external_service_response_recomputes_severity() {
        let err = AppError::external_service("geo", "lookup failed")
            .with_endpoint("/v1/geo")
            .with_response(502, "bad gateway");
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert_eq!(err.status_code(), Some(502));

        let err = AppError::external_service("geo", "lookup failed").with_response(400, "");
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_kind_specific_builders_ignore_other_kinds() {
        let err = AppError::validation("age", "negative").with_table("users").with_attempts(4);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.details(), &ErrorDetails::Validation { field: "age".into(), value: None });
    }

    #[test]
    fn test_context_is_copied_on_read() {
        let err = AppError::api(500, "/orders", "failed").with_context("request_id", "abc");

        let mut copy = err.context();
        copy.insert("request_id".into(), "tampered".into());
        copy.insert("extra".into(), "x".into());

        assert_eq!(err.context_value("request_id"), Some("abc"));
        assert_eq!(err.context().len(), 1);
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = AppError::connection("upstream dropped").with_cause(io);

        let source = err.source().expect("cause should be the source");
        assert_eq!(source.to_string(), "reset by peer");
    }

    #[test]
    fn test_retries_exhausted_wraps_last_error() {
        let last = AppError::connection("refused");
        let err = AppError::retries_exhausted(4, last);

        assert_eq!(err.network_failure(), Some(NetworkFailure::RetriesExhausted));
        assert!(matches!(err.details(), ErrorDetails::Network { attempts: 4, .. }));
        assert!(!err.is_retryable());
        assert!(err.source().is_some_and(|cause| cause.to_string().contains("refused")));
        assert!(err.to_string().contains("after 4 attempts"));
    }

    #[test]
    fn test_user_messages_are_not_technical() {
        let errors = [
            AppError::timeout(Duration::from_secs(5)),
            AppError::api(503, "/internal/v2/shard-7", "upstream reset"),
            AppError::database("deadlock detected", "write", "ordersdb", false),
            AppError::configuration("recovery_actions", "cycle"),
        ];

        for err in &errors {
            let message = err.user_message();
            assert!(!message.is_empty());
            assert!(!message.contains(err.message()), "user message leaked: {message}");
            assert!(!message.contains("/internal"));
        }
    }

    #[test]
    fn test_retry_after_from_context() {
        let err = AppError::api(429, "/search", "slow down").with_context("retry_after_ms", "1500");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_record_serializes_kind_and_severity() {
        let err = AppError::api(401, "/me", "expired token");
        let json = serde_json::to_value(err.to_record()).expect("record should serialize");

        assert_eq!(json["kind"], "api");
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["details"]["type"], "api");
        assert_eq!(json["details"]["status_code"], 401);
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ErrorKind::Api.to_string(), "APIError");
        assert_eq!(ErrorKind::Network.as_str(), "NetworkError");
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
        assert!(ErrorSeverity::Critical > ErrorSeverity::Low);
    }
}
