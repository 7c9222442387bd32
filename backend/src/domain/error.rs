//! Domain-level error types.
//!
//! These errors are transport agnostic. A gRPC or HTTP layer maps them onto
//! its own status codes; schedulers branch on [`ErrorCode`] to decide whether
//! to retry, re-read, or escalate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request is malformed or fails validation.
    InvalidRequest,
    /// The requested notification does not exist.
    NotFound,
    /// A notification with the same `(biz_id, key)` already exists.
    Duplicate,
    /// The tenant has no quota left on the channel.
    QuotaExhausted,
    /// An optimistic-concurrency race was lost; re-read and retry.
    VersionMismatch,
    /// The notification is not in the state the operation requires.
    FailedPrecondition,
    /// A backing store is unreachable.
    ServiceUnavailable,
    /// An unexpected error occurred inside the domain.
    InternalError,
}

/// Domain error payload.
///
/// # Examples
/// ```
/// use notification_platform::domain::{Error, ErrorCode};
///
/// let err = Error::not_found("missing");
/// assert_eq!(err.code(), ErrorCode::NotFound);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl Error {
    /// Create a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary error details.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Attach structured details to the error.
    ///
    /// # Examples
    /// ```
    /// use notification_platform::domain::Error;
    /// use serde_json::json;
    ///
    /// let err = Error::invalid_request("bad").with_details(json!({ "field": "key" }));
    /// assert!(err.details().is_some());
    /// ```
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Error for when the request failed validation.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Error for when the notification does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Error for when the idempotency key is already taken.
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Duplicate, message)
    }

    /// Error for when the tenant has no quota left.
    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QuotaExhausted, message)
    }

    /// Error for when a concurrent writer moved the row first.
    pub fn version_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::VersionMismatch, message)
    }

    /// Error for when the row is in the wrong state for the call.
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedPrecondition, message)
    }

    /// Error for when a backing store is unreachable.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Error for when an unexpected failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Error::invalid_request("x"), ErrorCode::InvalidRequest)]
    #[case(Error::duplicate("x"), ErrorCode::Duplicate)]
    #[case(Error::quota_exhausted("x"), ErrorCode::QuotaExhausted)]
    #[case(Error::version_mismatch("x"), ErrorCode::VersionMismatch)]
    #[case(Error::failed_precondition("x"), ErrorCode::FailedPrecondition)]
    #[case(Error::service_unavailable("x"), ErrorCode::ServiceUnavailable)]
    fn constructors_set_codes(#[case] error: Error, #[case] code: ErrorCode) {
        assert_eq!(error.code(), code);
    }

    #[rstest]
    fn serialises_with_snake_case_code() {
        let err = Error::quota_exhausted("no quota").with_details(json!({ "key": "quota:1:SMS" }));
        let value = serde_json::to_value(&err).expect("serialise error");

        assert_eq!(value["code"], "quota_exhausted");
        assert_eq!(value["message"], "no quota");
        assert_eq!(value["details"]["key"], "quota:1:SMS");
    }

    #[rstest]
    fn details_are_omitted_when_absent() {
        let value = serde_json::to_value(Error::internal("boom")).expect("serialise error");
        assert!(value.get("details").is_none());
    }
}
