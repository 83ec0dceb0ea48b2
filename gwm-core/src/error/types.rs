//! Core error types for gwm

use thiserror::Error;

use crate::validation::FieldErrors;

/// Error type for gwm operations
///
/// # Error Categories
///
/// - **Lookup Errors**: a referenced cluster, owner, node or VM is absent
/// - **Access Errors**: the acting user may not perform the operation
/// - **Dispatch Errors**: the request was rejected or the job service failed
/// - **Setup Errors**: configuration could not be loaded or is inconsistent
#[derive(Error, Debug)]
pub enum GwmError {
    // Lookup
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    // Access
    #[error("Authorization error: {message}")]
    AuthorizationError { message: String },

    // Dispatch
    #[error("Request rejected: {errors}")]
    InvalidRequest { errors: FieldErrors },

    #[error("Job service call '{operation}' failed: {details}")]
    Transport { operation: String, details: String },

    // Setup
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Plumbing
    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    IoError(#[source] Box<std::io::Error>),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type GwmResult<T> = std::result::Result<T, GwmError>;
