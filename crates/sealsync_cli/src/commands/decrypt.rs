//! Decrypt command implementation.

use super::{read_export, unlock, CliResult};
use sealsync_crypto::KdfCost;
use sealsync_protocol::{DomainRecord, RecordContent};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

/// A decrypted record as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct DecryptedItem {
    /// Record identity.
    pub uuid: Uuid,
    /// Wire content type.
    pub content_type: String,
    /// Title or name, if the content type has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Uuid of the record this one was forked from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,
    /// Last server modification, microseconds since the epoch.
    pub updated_at_timestamp: i64,
    /// Plaintext payload.
    pub content: Value,
}

impl DecryptedItem {
    fn from_record(record: &DomainRecord) -> CliResult<Self> {
        Ok(Self {
            uuid: record.uuid(),
            content_type: record.content_type().to_string(),
            title: record.title().map(str::to_string),
            duplicate_of: record.meta.duplicate_of,
            updated_at_timestamp: record.meta.updated_at_timestamp,
            content: serde_json::from_str(&record.content.to_json()?)?,
        })
    }
}

/// Decrypts every live user record of an export. Items keys are never
/// printed.
///
/// # Errors
///
/// The first record that fails to decrypt aborts the command.
pub fn decrypt(path: &Path, password: &str, cost: KdfCost) -> CliResult<Vec<DecryptedItem>> {
    let export = read_export(path)?;
    let session = unlock(&export, password, cost)?;

    let user_records: Vec<_> = export
        .items
        .into_iter()
        .filter(|r| !r.content_type.is_root_key_encrypted())
        .collect();
    session
        .decrypt_all(&user_records)?
        .iter()
        .map(DecryptedItem::from_record)
        .collect()
}

/// Runs the decrypt command.
pub fn run(path: &Path, password: &str, cost: KdfCost, format: &str) -> CliResult<()> {
    let items = decrypt(path, password, cost)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&items)?),
        _ => print_text_output(&items),
    }
    Ok(())
}

fn print_text_output(items: &[DecryptedItem]) {
    for item in items {
        println!(
            "{}  {:<14} {}",
            item.uuid,
            item.content_type,
            item.title.as_deref().unwrap_or("")
        );
        if let Some(text) = item.content.get("text").and_then(Value::as_str) {
            for line in text.lines() {
                println!("    {line}");
            }
        }
        if let Some(references) = item.content.get("references").and_then(Value::as_array) {
            if !references.is_empty() {
                println!("    -> {} reference(s)", references.len());
            }
        }
    }
    println!();
    println!("{} record(s)", items.len());
}
