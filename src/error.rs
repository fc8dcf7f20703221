//! Error types for dispatchd.

use std::time::Duration;

/// Top-level error type for the control plane.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Key-value store errors. These are infrastructure faults, not expected
/// outcomes — absence of a key is reported as `Option::None` by the store
/// trait, never as an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),
}

/// Task lifecycle errors. Expected conditions (unknown id, duplicate id,
/// refused deletion) are typed variants so the HTTP boundary can translate
/// them into status codes.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {id} unknown")]
    NotFound { id: String },

    #[error("task {id} already exists")]
    Conflict { id: String },

    #[error("{0}")]
    Validation(String),

    #[error("could not acquire lock {key} within {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    #[error("cannot delete task {id}: {reason}")]
    NotDeletable { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from service plugins, surfaced at the `check`/`launch` boundary.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The submitted options are invalid for this service (user error).
    #[error("{0}")]
    Invalid(String),

    /// The plugin itself failed unexpectedly.
    #[error("service failure: {0}")]
    Internal(String),
}

/// Result type alias for the control plane.
pub type Result<T> = std::result::Result<T, Error>;
