//! CLI command implementations.

pub mod decrypt;
pub mod inspect;
pub mod verify;

use sealsync_crypto::{CryptoError, KdfCost, RootKey};
use sealsync_engine::{Session, SyncError};
use sealsync_protocol::{ContentType, ExportDocument, ProtocolError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable holding the account password.
pub const PASSWORD_ENV: &str = "SEALSYNC_PASSWORD";

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The export file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The export file is not a valid export.
    #[error("invalid export file: {0}")]
    Export(#[from] ProtocolError),

    /// No password on the command line or in the environment.
    #[error("password required: pass --password or set {PASSWORD_ENV}")]
    MissingPassword,

    /// Root key derivation failed.
    #[error("key derivation failed: {0}")]
    Crypto(#[from] CryptoError),

    /// The items keys could not be unlocked with the given password.
    #[error("cannot unlock items keys (wrong password?): {0}")]
    Unlock(SyncError),

    /// A record could not be decrypted.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Output could not be serialized.
    #[error("cannot format output: {0}")]
    Json(#[from] serde_json::Error),

    /// Some records failed verification.
    #[error("{failed} record(s) failed verification")]
    VerificationFailed {
        /// Number of failing records.
        failed: usize,
    },
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Returns the password flag, falling back to [`PASSWORD_ENV`].
pub fn resolve_password(flag: Option<String>) -> CliResult<String> {
    flag.or_else(|| std::env::var(PASSWORD_ENV).ok())
        .filter(|p| !p.is_empty())
        .ok_or(CliError::MissingPassword)
}

/// Reads and parses an export file.
pub fn read_export(path: &Path) -> CliResult<ExportDocument> {
    let json = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ExportDocument::from_json(&json)?)
}

/// Derives the root key and loads every items key in the export.
pub fn unlock(export: &ExportDocument, password: &str, cost: KdfCost) -> CliResult<Session> {
    let root_key = RootKey::derive(password, export.key_params.clone(), cost)?;
    let mut session = Session::new(root_key);
    let keys: Vec<_> = export
        .items
        .iter()
        .filter(|r| r.content_type == ContentType::ItemsKey)
        .cloned()
        .collect();
    let loaded = session.load_keys(&keys).map_err(CliError::Unlock)?;
    debug!(loaded, "unlocked items keys");
    Ok(session)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sealsync_protocol::{EncryptedRecord, ExportDocument};
    use sealsync_testkit::prelude::*;
    use std::path::{Path, PathBuf};

    /// Writes an export holding a key record, two notes and a tag.
    pub fn write_export(dir: &Path) -> (PathBuf, Vec<EncryptedRecord>) {
        let account = TestAccount::new("cli@example.com");
        let (session, key_record) = account.registered_session();
        let first = note("Groceries", "milk, eggs");
        let second = note("Ideas", "write a parser");
        let label = tag("home", &[first.uuid()]);

        let mut items = vec![key_record];
        items.extend(seal_all(&session, &[first, second, label]));
        let export = ExportDocument::new(items.clone(), account.key_params().clone());
        let path = write_document(dir, &export);
        (path, items)
    }

    /// Writes an arbitrary export document.
    pub fn write_document(dir: &Path, export: &ExportDocument) -> PathBuf {
        let path = dir.join("export.json");
        std::fs::write(&path, export.to_json_pretty().unwrap()).unwrap();
        path
    }
}
