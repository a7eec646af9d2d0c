//! Sync endpoint request and response bodies.

use crate::record::EncryptedRecord;
use serde::{Deserialize, Serialize};

/// API version sent with every request.
pub const API_VERSION: &str = "20200115";

/// Body of a sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Protocol revision the client speaks.
    pub api_version: String,
    /// Outbound records for this page.
    pub items: Vec<EncryptedRecord>,
    /// Maximum number of inbound records per page.
    pub limit: u32,
    /// Change cursor from the previous completed sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Continuation marker of a multi-page pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
}

impl SyncRequest {
    /// Creates a request for one page.
    pub fn new(items: Vec<EncryptedRecord>, limit: u32) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            items,
            limit,
            sync_token: None,
            cursor_token: None,
        }
    }

    /// Sets the change cursor.
    pub fn with_sync_token(mut self, token: Option<String>) -> Self {
        self.sync_token = token;
        self
    }

    /// Sets the continuation marker.
    pub fn with_cursor_token(mut self, token: Option<String>) -> Self {
        self.cursor_token = token;
        self
    }
}

/// Body of a sync response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Records changed remotely since `sync_token`.
    #[serde(default)]
    pub retrieved_items: Vec<EncryptedRecord>,
    /// Acknowledged outbound records, usually without content.
    #[serde(default)]
    pub saved_items: Vec<EncryptedRecord>,
    /// Outbound records the server refused without a conflict.
    #[serde(default)]
    pub unsaved: Vec<EncryptedRecord>,
    /// Outbound records that collided with remote state.
    #[serde(default)]
    pub conflicts: Vec<ConflictedRecord>,
    /// New change cursor.
    #[serde(default)]
    pub sync_token: Option<String>,
    /// Set while more pages remain.
    #[serde(default)]
    pub cursor_token: Option<String>,
}

/// Why an outbound record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides modified the record since the last sync.
    SyncConflict,
    /// The client picked an identity that already exists remotely.
    UuidConflict,
}

/// A rejected outbound record together with the server's copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictedRecord {
    /// Conflict kind.
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    /// The server's current record. Absent for uuid conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_item: Option<EncryptedRecord>,
    /// The rejected outbound record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsaved_item: Option<EncryptedRecord>,
}

impl ConflictedRecord {
    /// Builds a sync conflict.
    pub fn sync_conflict(server_item: EncryptedRecord, unsaved_item: EncryptedRecord) -> Self {
        Self {
            kind: ConflictKind::SyncConflict,
            server_item: Some(server_item),
            unsaved_item: Some(unsaved_item),
        }
    }

    /// Builds a uuid conflict.
    pub fn uuid_conflict(unsaved_item: EncryptedRecord) -> Self {
        Self {
            kind: ConflictKind::UuidConflict,
            server_item: None,
            unsaved_item: Some(unsaved_item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentType;
    use uuid::Uuid;

    #[test]
    fn request_omits_absent_tokens() {
        let request = SyncRequest::new(vec![], 150);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["api_version"], API_VERSION);
        assert_eq!(value["limit"], 150);
        assert!(value.get("sync_token").is_none());
        assert!(value.get("cursor_token").is_none());

        let request = request
            .with_sync_token(Some("s".into()))
            .with_cursor_token(Some("c".into()));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["sync_token"], "s");
        assert_eq!(value["cursor_token"], "c");
    }

    #[test]
    fn sparse_response_parses() {
        let response: SyncResponse = serde_json::from_str(r#"{"sync_token":"abc"}"#).unwrap();
        assert!(response.retrieved_items.is_empty());
        assert!(response.conflicts.is_empty());
        assert_eq!(response.sync_token.as_deref(), Some("abc"));
        assert_eq!(response.cursor_token, None);
    }

    #[test]
    fn conflict_wire_shape() {
        let item = EncryptedRecord::tombstone(Uuid::new_v4(), ContentType::Note);
        let value = serde_json::to_value(ConflictedRecord::uuid_conflict(item)).unwrap();
        assert_eq!(value["type"], "uuid_conflict");
        assert!(value.get("server_item").is_none());

        let json = r#"{"type":"sync_conflict","server_item":null,"unsaved_item":null}"#;
        let conflict: ConflictedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(conflict.kind, ConflictKind::SyncConflict);
    }
}
