//! Error types for the VIP client.

use thiserror::Error;

/// A shared error type for the whole client.
///
/// Variants follow the failure taxonomy of a session lifecycle: configuration
/// problems are reported before any remote call, transport problems are
/// retried by the caller, and state-consistency problems are never silently
/// overwritten. Remote terminal failures (a workflow ending `Failed`) are data,
/// not errors, and never appear here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VipError {
    /// A set-once session property already holds a different value.
    #[error("'{property}' is already set to '{current}' (requested '{requested}')")]
    AlreadySet {
        property: String,
        current: String,
        requested: String,
    },

    /// A workflow identifier was registered twice.
    #[error("Workflow '{workflow_id}' is already registered")]
    DuplicateWorkflow { workflow_id: String },

    /// Malformed input settings (empty value, invalid characters, mismatched lists...)
    #[error("Invalid input settings: {0}")]
    InvalidInput(String),

    /// The pipeline identifier is not available to this account.
    #[error("Unknown pipeline identifier: '{0}'")]
    UnknownPipeline(String),

    /// A file referenced by the input settings does not exist.
    #[error("Parameter '{parameter}': file '{path}' is missing on {location}")]
    MissingInputFile {
        parameter: String,
        path: String,
        location: String,
    },

    /// A lifecycle step needs a property that was never set.
    #[error("Session '{session}' has no {property}")]
    MissingProperty { session: String, property: String },

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound { entity_type: String, id: String },

    /// The gateway refused a submission.
    #[error("Submission rejected: {0}")]
    Submission(String),

    /// Transient transport failure talking to the gateway.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A persisted record at the session location belongs to another session.
    #[error("Record at '{path}' belongs to session '{found}', not '{expected}'")]
    SessionMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A persisted record could not be decoded.
    #[error("Corrupt session record at '{path}': {message}")]
    CorruptRecord { path: String, message: String },

    /// The operation needs every workflow to be terminal.
    #[error("{} workflow(s) still running: {}", .0.len(), .0.join(", "))]
    WorkflowsRunning(Vec<String>),

    /// Monitoring reached its deadline before every workflow was terminal.
    #[error("Monitoring timed out after {elapsed_secs:.1}s with {} workflow(s) pending", pending.len())]
    MonitorTimeout {
        elapsed_secs: f64,
        pending: Vec<String>,
    },

    /// Monitoring was interrupted by a cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Multiple errors
    #[error("Multiple errors occurred ({} total)", .0.len())]
    Multiple(Vec<VipError>),
}

impl VipError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Creates an AlreadySet error from the debug rendering of both values.
    pub fn already_set(
        property: impl Into<String>,
        current: impl std::fmt::Debug,
        requested: impl std::fmt::Debug,
    ) -> Self {
        Self::AlreadySet {
            property: property.into(),
            current: format!("{:?}", current),
            requested: format!("{:?}", requested),
        }
    }

    pub fn missing_property(session: impl Into<String>, property: impl Into<String>) -> Self {
        Self::MissingProperty {
            session: session.into(),
            property: property.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_set(&self) -> bool {
        matches!(self, Self::AlreadySet { .. })
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transport and IO failures qualify; everything else is a property
    /// of the request or of the local state and would fail again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io { .. })
    }

    /// Whether the error must abort the operation before any remote call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::UnknownPipeline(_)
                | Self::MissingInputFile { .. }
                | Self::MissingProperty { .. }
                | Self::Config(_)
        )
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for VipError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for VipError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for VipError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for VipError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, VipError>`.
pub type Result<T> = std::result::Result<T, VipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_set_message_names_both_values() {
        let err = VipError::already_set("pipeline_id", "CQUEST/0.3", "FreeSurfer/7.1");
        let msg = err.to_string();
        assert!(msg.contains("pipeline_id"));
        assert!(msg.contains("CQUEST/0.3"));
        assert!(msg.contains("FreeSurfer/7.1"));
        assert!(err.is_already_set());
    }

    #[test]
    fn test_transient_classification() {
        assert!(VipError::transport("connection reset").is_transient());
        assert!(VipError::io("disk full").is_transient());
        assert!(!VipError::not_found("workflow", "workflow-1").is_transient());
        assert!(!VipError::invalid_input("empty").is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VipError = io.into();
        assert!(matches!(err, VipError::Io { .. }));
        assert!(err.to_string().contains("NotFound"));
    }
}
