//! Error types for the sync engine.

use crate::store::StoreError;
use sealsync_crypto::CryptoError;
use sealsync_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a failure, driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Server throttling. Retried with exponential backoff.
    RateLimit,
    /// A record needs a wrapping key this client does not have.
    MissingWrappingKey,
    /// Credentials are no longer valid.
    Authentication,
    /// Malformed local data or configuration.
    Validation,
    /// Transient transport failure.
    Network,
    /// Remote state collided with local changes.
    Conflict,
    /// Anything else. Treated as transient.
    Unknown,
}

impl ErrorKind {
    /// Returns true if failures of this kind are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Conflict | ErrorKind::Unknown
        )
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The request body was rejected as too large (HTTP 413).
    #[error("payload too large")]
    PayloadTooLarge,

    /// The session token expired (HTTP 498).
    #[error("session expired")]
    SessionExpired,

    /// The server refused the credentials (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// The server asked the client to slow down (HTTP 429).
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait.
        retry_after: Option<Duration>,
    },

    /// Any other HTTP error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The connection closed or reset mid-request.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Other transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body is not a valid sync response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Outbound records exist but no default wrapping key is set.
    #[error("no default wrapping key; cannot encrypt outbound records")]
    MissingDefaultKey,

    /// Push is disabled until these records' wrapping keys arrive.
    #[error("{} record(s) reference unknown wrapping keys", records.len())]
    MissingWrappingKeys {
        /// Records that cannot be decrypted.
        records: Vec<Uuid>,
    },

    /// Local data or configuration is malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Conflict resolution did not converge after one extra round.
    #[error("conflicts did not converge: {remaining} remaining after resubmission")]
    ConflictsDidNotConverge {
        /// Conflicts returned by the second round.
        remaining: usize,
    },

    /// A structural protocol rule was broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A retryable failure persisted through every attempt.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<SyncError>,
    },

    /// Encryption or key hierarchy error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Record model error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Replica store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Creates an invariant-violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Maps the error onto the retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RateLimited { .. } | SyncError::Unauthorized => ErrorKind::RateLimit,
            SyncError::SessionExpired => ErrorKind::Authentication,
            SyncError::PayloadTooLarge
            | SyncError::Timeout
            | SyncError::ConnectionReset(_)
            | SyncError::Transport(_) => ErrorKind::Network,
            SyncError::Server { .. } | SyncError::MalformedResponse(_) | SyncError::Store(_) => {
                ErrorKind::Unknown
            }
            SyncError::MissingDefaultKey | SyncError::MissingWrappingKeys { .. } => {
                ErrorKind::MissingWrappingKey
            }
            SyncError::Validation(_)
            | SyncError::InvariantViolation(_)
            | SyncError::Protocol(_) => ErrorKind::Validation,
            SyncError::ConflictsDidNotConverge { .. } => ErrorKind::Conflict,
            SyncError::RetriesExhausted { source, .. } => source.kind(),
            SyncError::Crypto(err) => match err {
                CryptoError::MissingKey { .. } => ErrorKind::MissingWrappingKey,
                _ => ErrorKind::Validation,
            },
        }
    }

    /// Returns true if the sync must stop immediately.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::SessionExpired
            | SyncError::ConflictsDidNotConverge { .. }
            | SyncError::InvariantViolation(_) => true,
            SyncError::Crypto(CryptoError::InvariantViolation(_)) => true,
            SyncError::RetriesExhausted { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        if self.is_fatal() {
            return false;
        }
        match self {
            SyncError::RetriesExhausted { .. } => false,
            _ => self.kind().is_retryable(),
        }
    }

    /// Returns true for failures answered by shrinking the page.
    pub fn shrinks_page(&self) -> bool {
        matches!(
            self,
            SyncError::PayloadTooLarge | SyncError::Timeout | SyncError::ConnectionReset(_)
        )
    }
}
