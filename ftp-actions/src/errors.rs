// Error handling for transfer actions

use std::fmt;
use thiserror::Error;

/// A single configuration failure collected during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub message: String,
    pub field: Option<String>,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} (field '{}')", self.message, field),
            None => write!(f, "{}", self.message),
        }
    }
}

fn join_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Action execution errors
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Login to {host}:{port} failed for user '{user}': {reason}")]
    Authentication {
        host: String,
        port: u16,
        user: String,
        reason: String,
    },

    #[error("Failed to list remote directory {path}: {reason}")]
    List { path: String, reason: String },

    #[error("Transfer of {path} failed: {reason}")]
    Transfer { path: String, reason: String },

    #[error("Failed to delete remote file {path}: {reason}")]
    Delete { path: String, reason: String },

    #[error("Invalid configuration: {}", join_failures(.0))]
    InvalidConfiguration(Vec<ValidationFailure>),

    #[error("Source files don't exist at {0}")]
    SourceNotFound(String),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),
}

impl ActionError {
    pub fn transfer(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        ActionError::Transfer {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Connection { .. } => "connection",
            ActionError::Authentication { .. } => "authentication",
            ActionError::List { .. } => "list",
            ActionError::Transfer { .. } => "transfer",
            ActionError::Delete { .. } => "delete",
            ActionError::InvalidConfiguration(_) => "configuration",
            ActionError::SourceNotFound(_) => "source_not_found",
            ActionError::Storage(_) => "storage",
        }
    }
}

/// Destination store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Filesystem error on {path}: {source}")]
    FileSystem {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::FileSystem {
            path: path.into(),
            source,
        }
    }
}
