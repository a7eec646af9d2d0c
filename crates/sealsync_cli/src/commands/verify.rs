//! Verify command implementation.
//!
//! Every live record must resolve its wrapping key and pass envelope
//! authentication. Payloads are not parsed, so records of content types this
//! build does not know are still verified.

use super::{read_export, unlock, CliError, CliResult};
use sealsync_crypto::KdfCost;
use serde::Serialize;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// Verification result.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Export file path.
    pub path: String,
    /// Number of items keys unlocked.
    pub items_keys: usize,
    /// Live records checked.
    pub checked: usize,
    /// Tombstones skipped.
    pub skipped_deleted: usize,
    /// Records that failed.
    pub failures: Vec<VerifyFailure>,
}

/// One failing record.
#[derive(Debug, Serialize)]
pub struct VerifyFailure {
    /// Record identity.
    pub uuid: Uuid,
    /// Wire content type.
    pub content_type: String,
    /// Why it failed.
    pub error: String,
}

impl VerifyResult {
    /// Returns true if every record verified.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Verifies an export file.
///
/// # Errors
///
/// Fails if the file cannot be read or the items keys cannot be unlocked.
/// Individual record failures are reported in the result.
pub fn verify(path: &Path, password: &str, cost: KdfCost) -> CliResult<VerifyResult> {
    let export = read_export(path)?;
    let session = unlock(&export, password, cost)?;

    let mut result = VerifyResult {
        path: path.display().to_string(),
        items_keys: session.keys().len(),
        checked: 0,
        skipped_deleted: 0,
        failures: Vec::new(),
    };

    for record in &export.items {
        if record.deleted {
            result.skipped_deleted += 1;
            continue;
        }
        result.checked += 1;
        let outcome = session
            .keys()
            .resolve_key(record, session.root_key())
            .and_then(|key| session.codec().decrypt(record, key));
        if let Err(err) = outcome {
            warn!(uuid = %record.uuid, error = %err, "record failed verification");
            result.failures.push(VerifyFailure {
                uuid: record.uuid,
                content_type: record.content_type.to_string(),
                error: err.to_string(),
            });
        }
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path, password: &str, cost: KdfCost, format: &str) -> CliResult<()> {
    let result = verify(path, password, cost)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(CliError::VerificationFailed {
            failed: result.failures.len(),
        })
    }
}

fn print_text_output(result: &VerifyResult) {
    println!("SealSync Export Verification");
    println!("============================");
    println!();
    println!("Path:       {}", result.path);
    println!("Items keys: {}", result.items_keys);
    println!("Checked:    {}", result.checked);
    println!("Tombstones: {}", result.skipped_deleted);
    println!();

    if result.is_ok() {
        println!("✓ All records verified");
    } else {
        println!("✗ {} record(s) failed:", result.failures.len());
        for failure in &result.failures {
            println!(
                "  {} [{}] {}",
                failure.uuid, failure.content_type, failure.error
            );
        }
    }
}
