//! Error types for the workflow engine

use thiserror::Error;

use calyx_component_model::{ComponentError, EndpointError};

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the workflow engine
///
/// The taxonomy deliberately distinguishes "the component said no"
/// ([`EngineError::Component`]) from "could not even ask"
/// ([`EngineError::RemoteFailure`]); expected absences are modeled as `None`
/// returns on the affected APIs, not as errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A component lifecycle or decision callback failed; fatal to the
    /// instance, never retried
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// A lifecycle call was issued against an instance in the wrong state
    #[error("component lifecycle issue: {0}")]
    Lifecycle(String),

    /// No node with the given identifier exists in the workflow description
    #[error("no node with identifier {0} found")]
    UnknownNode(String),

    /// No component with the given identifier is registered
    #[error("no component with identifier {0} registered")]
    UnknownComponent(String),

    /// An endpoint mutation was rejected
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// A required collaborator service was never injected
    #[error("required service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The distributed call itself failed, as opposed to a domain error
    #[error("remote call failed: {0}")]
    RemoteFailure(String),

    /// Parsing a persisted workflow failed; no partial result is produced
    #[error("parsing workflow file failed: {0}")]
    Parse(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a lifecycle-issue error for a call that found the instance in
    /// the wrong state
    pub fn lifecycle_issue(operation: &str, expected: &str, actual: impl std::fmt::Display) -> Self {
        Self::Lifecycle(format!(
            "when {} was requested: needs to be {} but was {}",
            operation, expected, actual
        ))
    }
}
