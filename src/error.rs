//! Error types for the vector store service
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;

use thiserror::Error;

use crate::vector::{ClusteringError, VectorError};

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum RagError {
    /// Vector layer errors (dimension mismatch, bad filters, persistence)
    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Clustering(#[from] ClusteringError),

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store was used after `close()`
    #[error("Store is closed")]
    Closed,

    /// General errors for cases where we need to preserve existing behavior
    #[error("{0}")]
    General(String),
}

impl RagError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Vector(e) => match e {
                VectorError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                VectorError::InvalidDimension { .. } => "INVALID_DIMENSION",
                VectorError::InvalidScore { .. } => "INVALID_SCORE",
                VectorError::InvalidWeight { .. } => "INVALID_WEIGHT",
                VectorError::InvalidFilter { .. } => "INVALID_FILTER",
                VectorError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
                VectorError::Persistence { .. } => "PERSISTENCE_ERROR",
                VectorError::Serialization(_) => "SERIALIZATION_ERROR",
                VectorError::Storage(_) => "STORAGE_ERROR",
            },
            Self::Clustering(_) => "CLUSTERING_ERROR",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::ConfigError { .. } | Self::ConfigLoad(_) => "CONFIG_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Closed => "STORE_CLOSED",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Vector(VectorError::DimensionMismatch { .. }) => vec![
                "All vectors in one store must share a dimension",
                "Use a separate data_dir for a different embedding provider",
            ],
            Self::Vector(VectorError::InvalidFilter { .. }) => vec![
                "Filter values must be strings, numbers, booleans, null or arrays",
            ],
            Self::Vector(VectorError::ProviderUnavailable(_)) => vec![
                "Check the remote index host and API key in .ragstore/settings.toml",
                "Set remote.enabled = false to use the local store",
            ],
            Self::Vector(VectorError::Persistence { .. }) => vec![
                "A corrupt snapshot is moved aside as vectors.json.corrupt",
                "Check disk space and permissions in the data directory",
            ],
            Self::ConfigError { .. } | Self::ConfigLoad(_) => vec![
                "Run 'ragstore init --force' to regenerate the default settings",
                "Check RAGSTORE_* environment variables for typos",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::Closed => vec!["Create a new store with RagStore::init"],
            _ => vec![],
        }
    }
}

impl From<figment::Error> for RagError {
    fn from(e: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(e))
    }
}

/// Result type alias for store operations
pub type RagResult<T> = Result<T, RagError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, RagError>;

    /// Add context with a path
    fn with_path(self, path: &std::path::Path) -> Result<T, RagError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, RagError> {
        self.map_err(|e| RagError::General(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, RagError> {
        self.map_err(|e| {
            RagError::General(format!("Error processing '{}': {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        let err = RagError::from(VectorError::DimensionMismatch {
            expected: 3,
            actual: 2,
        });
        assert_eq!(err.status_code(), "DIMENSION_MISMATCH");
        assert!(!err.recovery_suggestions().is_empty());

        assert_eq!(RagError::Closed.status_code(), "STORE_CLOSED");
        assert_eq!(
            RagError::ConfigError {
                reason: "x".to_string()
            }
            .status_code(),
            "CONFIG_ERROR"
        );
    }

    #[test]
    fn test_vector_error_message_is_transparent() {
        let inner = VectorError::ProviderUnavailable("timeout".to_string());
        let message = inner.to_string();
        assert_eq!(RagError::from(inner).to_string(), message);
    }

    #[test]
    fn test_context_helpers() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result.with_path(std::path::Path::new("doc.txt")).unwrap_err();
        assert!(err.to_string().contains("doc.txt"));
    }
}
