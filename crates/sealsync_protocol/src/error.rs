//! Error types for the protocol crate.

use thiserror::Error;
use uuid::Uuid;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building or reading protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The content type has no typed payload in this client.
    #[error("unknown content type: {0}")]
    UnknownContentType(String),

    /// The decrypted payload does not parse as the declared content type.
    #[error("invalid {content_type} content for record {uuid}: {message}")]
    InvalidContent {
        /// Record identity.
        uuid: Uuid,
        /// Declared content type.
        content_type: String,
        /// Parser message.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The export file was written by an unsupported protocol version.
    #[error("unsupported export version: {0}")]
    UnsupportedVersion(String),
}
