//! Error types for the AppService operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Store failures keep the underlying kube-rs error so the error policy can
//! tell transient failures (network, throttling, conflicts) from permanent ones.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for AppService operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for an AppService spec or its identity
    #[error("validation error for {app}: {message}")]
    Validation {
        /// `namespace/name` of the AppService with invalid configuration
        app: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.ports[0].port")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The caller cancelled the reconciliation or its deadline elapsed
    #[error("reconciliation cancelled: {reason}")]
    Cancelled {
        /// Why the in-flight store calls were abandoned
        reason: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "client")
        context: String,
    },
}

impl Error {
    /// Create a validation error with AppService context
    pub fn validation_for(app: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            app: app.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    ///
    /// The AppService context is filled in by [`Error::with_app`] once the
    /// caller knows which object was being validated.
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            app: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error with the given reason
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Attach AppService context to a validation error that lacks it
    pub fn with_app(self, app: impl Into<String>) -> Self {
        match self {
            Self::Validation {
                app: existing,
                message,
                field,
            } if existing == UNKNOWN_CONTEXT => Self::Validation {
                app: app.into(),
                message,
                field,
            },
            other => other,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec (or code) change.
    /// Kubernetes errors are retryable unless the API server rejected the
    /// request as malformed; 404, 409 and 429 are always treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    matches!(ae.code, 404 | 409 | 429) || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the `namespace/name` of the AppService if this error carries one
    pub fn app(&self) -> Option<&str> {
        match self {
            Error::Validation { app, .. } => Some(app),
            _ => None,
        }
    }

    /// HTTP status code returned by the API server, if this is an API error
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from api server", reason),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: Validation errors surface the offending AppService and field
    #[test]
    fn story_validation_error_carries_context() {
        let err = Error::validation_for_field("spec.ports[0].port", "port must be in 1..=65535")
            .with_app("default/web");
        assert!(err.to_string().contains("default/web"));
        assert!(err.to_string().contains("1..=65535"));
        assert_eq!(err.app(), Some("default/web"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.ports[0].port"));
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn with_app_keeps_existing_context() {
        let err = Error::validation_for("prod/api", "bad").with_app("other/app");
        assert_eq!(err.app(), Some("prod/api"));

        let err = Error::internal_with_context("reconciler", "boom").with_app("other/app");
        assert_eq!(err.app(), None);
    }

    #[rstest]
    #[case::conflict(409, "Conflict", true)]
    #[case::not_found(404, "NotFound", true)]
    #[case::throttled(429, "TooManyRequests", true)]
    #[case::server_error(500, "InternalError", true)]
    #[case::unavailable(503, "ServiceUnavailable", true)]
    #[case::invalid(422, "Invalid", false)]
    #[case::forbidden(403, "Forbidden", false)]
    fn test_kube_api_error_retryability(
        #[case] code: u16,
        #[case] reason: &str,
        #[case] retryable: bool,
    ) {
        let err = api_error(code, reason);
        assert_eq!(err.is_retryable(), retryable);
        assert_eq!(err.api_code(), Some(code));
    }

    #[test]
    fn test_error_retryability() {
        assert!(!Error::validation_for("default/web", "bad spec").is_retryable());
        assert!(!Error::serialization_for_kind("AppService", "parse error").is_retryable());
        assert!(Error::cancelled("shutdown requested").is_retryable());
        assert!(Error::internal_with_context("reconciler", "unexpected").is_retryable());
    }

    #[test]
    fn test_cancelled_error_context() {
        let err = Error::cancelled("deadline of 30s exceeded");
        assert_eq!(
            err.to_string(),
            "reconciliation cancelled: deadline of 30s exceeded"
        );
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("reconciler", "unexpected state");
        assert_eq!(err.to_string(), "internal error [reconciler]: unexpected state");
    }

    #[test]
    fn test_serialization_for_kind() {
        let err = Error::serialization_for_kind("Deployment", "missing field 'spec'");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Deployment")),
            _ => panic!("Expected Serialization variant"),
        }
        assert_eq!(err.api_code(), None);
    }
}
