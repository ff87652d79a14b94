//! Cloud agent client errors

use thiserror::Error;

/// Machine-readable error codes returned by the cloud agent.
pub mod codes {
    /// Resource does not exist
    pub const NOT_FOUND: &str = "NotFound";
    /// Resource already exists
    pub const ALREADY_EXISTS: &str = "AlreadyExists";
    /// Host pool has no memory left for the request
    pub const OUT_OF_MEMORY: &str = "OutOfMemory";
    /// Host pool has no capacity left for the request
    pub const OUT_OF_CAPACITY: &str = "OutOfCapacity";
}

/// Errors that can occur when interacting with the cloud agent
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Cloud agent returned an error with a code
    #[error("Cloud agent error [{code}]: {message}")]
    Api {
        /// Machine-readable code (see [`codes`])
        code: String,
        /// Human-readable message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authorization failed (missing token, rejected token, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid request (e.g., malformed spec)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CloudError {
    /// Whether the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { code, .. } => code == codes::NOT_FOUND,
            _ => false,
        }
    }

    /// Whether the resource already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Api { code, .. } => code == codes::ALREADY_EXISTS,
            _ => false,
        }
    }

    /// Machine-readable code, when the agent supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::NotFound(_) => Some(codes::NOT_FOUND),
            Self::AlreadyExists(_) => Some(codes::ALREADY_EXISTS),
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}
