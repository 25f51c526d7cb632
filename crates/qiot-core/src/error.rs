//! Unified error handling for QIoT.
//!
//! Every crate in the workspace either returns this error directly or
//! converts its local error type into it, so callers of the service layer
//! observe a single taxonomy.

/// Unified error type for QIoT.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An identifier could not be parsed into the store's native key format.
    #[error("Malformed id '{id}': {reason}")]
    MalformedId { id: String, reason: String },

    /// A referenced experiment, sensor or service could not be resolved.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or protocol failure talking to a remote collaborator.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote collaborator answered with a non-success status.
    #[error("Remote error (status {status}): {body}")]
    Remote { status: u16, body: String },

    /// A remote call exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Some broker upserts failed after others succeeded.
    #[error(
        "Partial sync: {} failed, {} succeeded (failed: {})",
        .failed.len(),
        .succeeded.len(),
        .failed.join(", ")
    )]
    PartialSync {
        failed: Vec<String>,
        succeeded: Vec<String>,
    },

    /// A write to the document store did not modify anything.
    #[error("Nothing modified: {0}")]
    NotModified(String),

    /// A stored document does not have the expected shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Storage/database errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller cancelled the operation before this step ran.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedId { .. } => "malformed_id",
            Error::NotFound(_) => "not_found",
            Error::Transport(_) => "transport",
            Error::Remote { .. } => "remote",
            Error::Timeout(_) => "timeout",
            Error::PartialSync { .. } => "partial_sync",
            Error::NotModified(_) => "not_modified",
            Error::InvalidDocument(_) => "invalid_document",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Cancelled(_) => "cancelled",
        }
    }

    /// Whether the error came from talking to a remote system.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Remote { .. } | Error::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sync_display_lists_failures() {
        let err = Error::PartialSync {
            failed: vec!["temp01_airtemperature".to_string()],
            succeeded: vec!["temp01_humidity".to_string(), "temp01_rssi".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 failed"));
        assert!(msg.contains("2 succeeded"));
        assert!(msg.contains("temp01_airtemperature"));
    }

    #[test]
    fn test_remote_classification() {
        assert!(Error::Timeout("emqx".into()).is_remote());
        assert!(Error::Remote {
            status: 500,
            body: String::new()
        }
        .is_remote());
        assert!(!Error::NotFound("sensor".into()).is_remote());
        assert_eq!(Error::NotFound("x".into()).kind(), "not_found");
    }
}
