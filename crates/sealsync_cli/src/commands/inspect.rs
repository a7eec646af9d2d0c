//! Inspect command implementation.

use super::{read_export, CliResult};
use sealsync_protocol::ContentType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Export inspection result. Needs no password.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Export file path.
    pub path: String,
    /// Export format version.
    pub version: String,
    /// Account identifier.
    pub identifier: String,
    /// Key protocol version.
    pub key_version: String,
    /// What created the key parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origination: Option<String>,
    /// Number of records, tombstones included.
    pub total_records: usize,
    /// Number of tombstones.
    pub deleted: usize,
    /// Live records per content type.
    pub by_content_type: BTreeMap<String, usize>,
    /// Live records wrapped by an items key that is not in the export.
    pub orphaned: usize,
}

/// Collects statistics for an export file.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let export = read_export(path)?;

    let key_ids: Vec<_> = export
        .items
        .iter()
        .filter(|r| r.content_type == ContentType::ItemsKey && !r.deleted)
        .map(|r| r.uuid)
        .collect();
    let orphaned = export
        .items
        .iter()
        .filter(|r| !r.deleted)
        .filter_map(|r| r.wrapping_key_id)
        .filter(|id| !key_ids.contains(id))
        .count();

    Ok(InspectResult {
        path: path.display().to_string(),
        version: export.version.clone(),
        identifier: export.key_params.identifier.clone(),
        key_version: export.key_params.version.clone(),
        origination: export.key_params.origination.clone(),
        total_records: export.items.len(),
        deleted: export.deleted_count(),
        by_content_type: export
            .count_by_content_type()
            .into_iter()
            .map(|(ct, n)| (ct.to_string(), n))
            .collect(),
        orphaned,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let result = inspect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("SealSync Export Inspection");
    println!("==========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Version: {}", result.version);
    println!();
    println!("Account:");
    println!("  Identifier:  {}", result.identifier);
    println!("  Key version: {}", result.key_version);
    if let Some(origination) = &result.origination {
        println!("  Origination: {origination}");
    }
    println!();
    println!("Records:");
    println!("  Total:      {}", result.total_records);
    println!("  Tombstones: {}", result.deleted);
    if result.orphaned > 0 {
        println!("  Orphaned:   {} (wrapping key not in export)", result.orphaned);
    }
    println!();
    println!("By content type:");
    for (content_type, count) in &result.by_content_type {
        println!("  {content_type:<16} {count}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{write_document, write_export};
    use sealsync_protocol::{EncryptedRecord, ExportDocument};

    #[test]
    fn counts_records_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_export(dir.path());

        let result = inspect(&path).unwrap();
        assert_eq!(result.identifier, "cli@example.com");
        assert_eq!(result.total_records, 4);
        assert_eq!(result.deleted, 0);
        assert_eq!(result.orphaned, 0);
        assert_eq!(result.by_content_type.get("Note"), Some(&2));
        assert_eq!(result.by_content_type.get("Tag"), Some(&1));
        assert_eq!(result.by_content_type.get("SN|ItemsKey"), Some(&1));
    }

    #[test]
    fn reports_orphans_and_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let (path, items) = write_export(dir.path());
        let mut export = read_export(&path).unwrap();
        export.items.retain(|r| r.content_type != ContentType::ItemsKey);
        export
            .items
            .push(EncryptedRecord::tombstone(items[1].uuid, ContentType::Note));
        let path = write_document(dir.path(), &ExportDocument::new(export.items, export.key_params));

        let result = inspect(&path).unwrap();
        assert_eq!(result.deleted, 1);
        assert_eq!(result.orphaned, 3);
        assert!(result.by_content_type.get("SN|ItemsKey").is_none());
    }

    #[test]
    fn json_output_has_no_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_export(dir.path());
        let json = serde_json::to_string(&inspect(&path).unwrap()).unwrap();
        assert!(!json.contains("pw_nonce"));
        assert!(json.contains("\"by_content_type\""));
    }
}
