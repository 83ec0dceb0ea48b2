//! Constructor methods and convenience functions for GwmError

use super::types::GwmError;
use crate::validation::FieldErrors;

impl GwmError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use gwm_core::error::GwmError;
    ///
    /// let err = GwmError::configuration("jobs.refresh_timeout", "must be non-zero");
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        GwmError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        GwmError::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an authorization error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        GwmError::AuthorizationError {
            message: message.into(),
        }
    }

    /// Create a job service transport error
    pub fn transport(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        GwmError::Transport {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Reject a request as a whole with the collected field errors
    pub fn invalid_request(errors: FieldErrors) -> Self {
        GwmError::InvalidRequest { errors }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        GwmError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        GwmError::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a missing-object signal rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, GwmError::NotFound { .. })
    }
}
