//! Error types for Drover
//!
//! Centralized error handling using thiserror. Subsystems with richer
//! failure vocabularies (swarm, invocation) define their own enums and
//! convert into `DroverError` at the controller boundary.

use std::path::PathBuf;

use thiserror::Error;

/// All error types that can occur in Drover
#[derive(Debug, Error)]
pub enum DroverError {
    /// Invalid configuration, reported before any iteration runs
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// No hashing primitive / fingerprint source available
    #[error("Hash unavailable: {0}")]
    HashUnavailable(String),

    /// Artifact could not be read or parsed
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Agent invocation could not be started
    #[error("Invocation error: {0}")]
    Invoke(String),

    /// Task board / metrics persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Swarm coordination error
    #[error("Swarm error: {0}")]
    Swarm(#[from] crate::swarm::SwarmError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Drover operations
pub type Result<T> = std::result::Result<T, DroverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = DroverError::Config("max-iterations must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: max-iterations must be > 0"
        );
    }

    #[test]
    fn test_path_not_found_display() {
        let err = DroverError::PathNotFound(PathBuf::from("/missing/project"));
        assert_eq!(err.to_string(), "Path not found: /missing/project");
    }

    #[test]
    fn test_hash_unavailable_display() {
        let err = DroverError::HashUnavailable("no git, no readable tree".to_string());
        assert!(err.to_string().contains("Hash unavailable"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DroverError = io_err.into();
        assert!(matches!(err, DroverError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DroverError = json_err.into();
        assert!(matches!(err, DroverError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(DroverError::Artifact("bad plan".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
