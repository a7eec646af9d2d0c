//! Error types for the crypto crate.

use sealsync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while deriving keys, sealing or opening records.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material has the wrong length.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Actual size provided.
        actual: usize,
        /// Expected size.
        expected: usize,
    },

    /// Key material is not valid hex.
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// The envelope string does not parse.
    #[error("malformed envelope: {message}")]
    MalformedEnvelope {
        /// Description of the problem.
        message: String,
    },

    /// The envelope was produced by a protocol version this client does not speak.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    /// The envelope is bound to another record, type or account.
    #[error("associated data mismatch for record {uuid}")]
    AssociatedDataMismatch {
        /// Record being opened.
        uuid: Uuid,
    },

    /// The authentication tag did not verify. Wrong key or tampered data.
    #[error("authentication failed for record {uuid}")]
    Authentication {
        /// Record being opened.
        uuid: Uuid,
    },

    /// Sealing failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// No known key can decrypt the record.
    #[error("missing wrapping key {wrapping_key_id:?} for record {uuid}")]
    MissingKey {
        /// Record that cannot be decrypted.
        uuid: Uuid,
        /// Wrapping key it references, if any.
        wrapping_key_id: Option<Uuid>,
    },

    /// Deleted records carry no content.
    #[error("cannot decrypt deleted record {0}")]
    CannotDecryptDeleted(Uuid),

    /// An items key record lacks identity or key material.
    #[error("malformed items key record {uuid}: {reason}")]
    MalformedKeyRecord {
        /// Record identity.
        uuid: Uuid,
        /// What is missing.
        reason: String,
    },

    /// A structural rule of the key hierarchy was broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Password-based derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Record payload error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Associated data encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CryptoError {
    /// Creates a malformed-envelope error.
    pub fn malformed_envelope(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
        }
    }

    /// Creates a malformed-key-record error.
    pub fn malformed_key_record(uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::MalformedKeyRecord {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates an invariant-violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Creates an invalid-key-size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { actual, expected }
    }
}
