//! Error types for ifxlink

use thiserror::Error;

/// Result type alias for ifxlink operations
pub type IfxResult<T> = Result<T, IfxError>;

/// Error types for remote table operations
#[derive(Debug, Error)]
pub enum IfxError {
    /// Remote connection could not be established or made current
    #[error("Connection error: {0}")]
    Connection(String),

    /// SQL error reported by the remote server
    #[error("Remote error: \"{message}\" (SQLSTATE {sqlstate}, SQLCODE={sqlcode})")]
    Remote {
        sqlstate: String,
        sqlcode: i32,
        message: String,
    },

    /// Remote table does not exist
    #[error("Remote table not found: \"{message}\" (SQLSTATE {sqlstate})")]
    TableNotFound { sqlstate: String, message: String },

    /// Local and remote table definitions conflict
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Remote NULL arrived for a column declared NOT NULL locally
    #[error("NULL value for column \"{column}\" violates local NOT NULL constraint")]
    NotNullViolation { column: String },

    /// Value decode/encode error
    #[error("Conversion error on column '{column}': {message}")]
    Conversion { column: String, message: String },

    /// Operation the remote server or this engine does not support
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid or missing configuration option
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Named object (cached session, cursor) is unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// Engine invariant violated; indicates a bug, not user error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IfxError {
    /// Create a conversion error for a specific column
    pub fn conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaMismatch(message.into())
    }

    /// Create an invalid option error
    pub fn option(message: impl Into<String>) -> Self {
        Self::InvalidOption(message.into())
    }

    /// Create an internal invariant error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a connection error
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if this is a schema mismatch
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch(_) | Self::NotNullViolation { .. })
    }

    /// Check if this is an unsupported-operation error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}
