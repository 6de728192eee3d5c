use crate::domain::state_machine::TransitionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors surfaced by the gateway core.
///
/// Every variant maps to a stable machine-readable code and an HTTP status so
/// that an outer transport layer can translate it without inspecting messages.
/// Messages never carry secrets: password hashes, webhook secrets and lock
/// internals stay out of every variant.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("service temporarily unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentError {
    /// Stable error code, safe to return to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::AuthenticationFailed => "AUTHENTICATION_FAILED",
            PaymentError::ValidationFailed(_) => "VALIDATION_FAILED",
            PaymentError::NotFound(_) => "NOT_FOUND",
            PaymentError::Conflict(_) => "CONFLICT",
            PaymentError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            PaymentError::Transition(TransitionError::AlreadyInState { .. }) => "ALREADY_IN_STATE",
            PaymentError::Transition(TransitionError::InvalidTransition { .. }) => {
                "INVALID_TRANSITION"
            }
            PaymentError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            PaymentError::Timeout(_) => "TIMEOUT",
            PaymentError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            PaymentError::Csv(_) | PaymentError::Json(_) => "MALFORMED_INPUT",
            PaymentError::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::AuthenticationFailed => 401,
            PaymentError::ValidationFailed(_) => 400,
            PaymentError::NotFound(_) => 404,
            PaymentError::Conflict(_) | PaymentError::Transition(_) => 409,
            PaymentError::LimitExceeded(_) => 402,
            PaymentError::UnsupportedOperation(_) => 422,
            PaymentError::Timeout(_) => 504,
            PaymentError::ServiceUnavailable(_) => 503,
            PaymentError::Csv(_) | PaymentError::Json(_) => 400,
            PaymentError::Io(_) => 500,
        }
    }

    /// Whether the failure may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PaymentError::Timeout(_) | PaymentError::ServiceUnavailable(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::ServiceUnavailable(format!("storage: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;
    use crate::domain::state_machine::PaymentEvent;

    #[test]
    fn test_transition_errors_keep_specific_codes() {
        let already: PaymentError = TransitionError::AlreadyInState {
            status: PaymentStatus::Confirmed,
        }
        .into();
        assert_eq!(already.code(), "ALREADY_IN_STATE");
        assert_eq!(already.http_status(), 409);

        let invalid: PaymentError = TransitionError::InvalidTransition {
            from: PaymentStatus::Confirmed,
            event: PaymentEvent::Authorize,
        }
        .into();
        assert_eq!(invalid.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_only_timeouts_and_unavailability_are_transient() {
        assert!(PaymentError::Timeout("lock".into()).is_transient());
        assert!(PaymentError::ServiceUnavailable("db".into()).is_transient());
        assert!(!PaymentError::Conflict("order".into()).is_transient());
        assert!(!PaymentError::AuthenticationFailed.is_transient());
    }

    #[test]
    fn test_authentication_message_is_uniform() {
        assert_eq!(
            PaymentError::AuthenticationFailed.to_string(),
            "authentication failed"
        );
    }
}
