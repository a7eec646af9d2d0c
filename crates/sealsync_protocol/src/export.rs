//! Export file format.

use crate::content_type::ContentType;
use crate::error::{ProtocolError, ProtocolResult};
use crate::key_params::KeyParams;
use crate::record::EncryptedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Export format version.
pub const EXPORT_VERSION: &str = "004";

/// An encrypted backup of an account.
///
/// Records stay encrypted. `key_params` is enough to re-derive the root key
/// from the password and unlock the items keys contained in `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Format version.
    pub version: String,
    /// Every record of the account, including items keys.
    pub items: Vec<EncryptedRecord>,
    /// Account key-derivation parameters.
    #[serde(rename = "keyParams")]
    pub key_params: KeyParams,
}

impl ExportDocument {
    /// Creates an export of the given records.
    pub fn new(items: Vec<EncryptedRecord>, key_params: KeyParams) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            items,
            key_params,
        }
    }

    /// Parses an export file.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an export version other than
    /// [`EXPORT_VERSION`].
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let doc: ExportDocument = serde_json::from_str(json)?;
        if doc.version != EXPORT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(doc.version));
        }
        Ok(doc)
    }

    /// Serializes with indentation.
    pub fn to_json_pretty(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Counts live records per content type.
    pub fn count_by_content_type(&self) -> BTreeMap<ContentType, usize> {
        let mut counts = BTreeMap::new();
        for item in self.items.iter().filter(|i| !i.deleted) {
            *counts.entry(item.content_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of tombstones.
    pub fn deleted_count(&self) -> usize {
        self.items.iter().filter(|i| i.deleted).count()
    }
}
