//! Encrypted and decrypted record shapes.

use crate::content_type::ContentType;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Returns the current wall-clock time as an RFC 3339 string and as
/// microseconds since the Unix epoch.
pub fn timestamp_now() -> (String, i64) {
    let now = Utc::now();
    (
        now.to_rfc3339_opts(SecondsFormat::Micros, true),
        now.timestamp_micros(),
    )
}

/// Identity and timestamps shared by every record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    /// Stable identity.
    pub uuid: Uuid,
    /// Creation time, wall clock.
    pub created_at: String,
    /// Last modification time, wall clock.
    pub updated_at: String,
    /// Creation time in microseconds.
    pub created_at_timestamp: i64,
    /// Last modification time in microseconds.
    pub updated_at_timestamp: i64,
    /// Record this one was forked from during conflict resolution.
    pub duplicate_of: Option<Uuid>,
}

impl RecordMeta {
    /// Creates metadata for a new record with the given identity.
    pub fn new(uuid: Uuid) -> Self {
        let (text, micros) = timestamp_now();
        Self {
            uuid,
            created_at: text.clone(),
            updated_at: text,
            created_at_timestamp: micros,
            updated_at_timestamp: micros,
            duplicate_of: None,
        }
    }

    /// Creates metadata for a new record with a random identity.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// A record as stored on the server and in the local replica.
///
/// `content` and `wrapped_key` are envelopes; both are empty for deleted
/// records. The serde names follow the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Stable identity.
    pub uuid: Uuid,
    /// Wrapping key that protects `wrapped_key`. `None` for root-wrapped records.
    #[serde(rename = "items_key_id", default, skip_serializing_if = "Option::is_none")]
    pub wrapping_key_id: Option<Uuid>,
    /// Envelope holding the record body.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Discriminator.
    pub content_type: ContentType,
    /// Envelope holding the per-record content key.
    #[serde(rename = "enc_item_key", default, deserialize_with = "null_as_empty")]
    pub wrapped_key: String,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Creation time, wall clock.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub created_at: String,
    /// Last modification time, wall clock.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub updated_at: String,
    /// Creation time in microseconds.
    #[serde(default)]
    pub created_at_timestamp: i64,
    /// Last modification time in microseconds.
    #[serde(default)]
    pub updated_at_timestamp: i64,
    /// Record this one was forked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,
    /// Legacy authentication hash, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
}

impl EncryptedRecord {
    /// Returns the identity and timestamps.
    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            uuid: self.uuid,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            created_at_timestamp: self.created_at_timestamp,
            updated_at_timestamp: self.updated_at_timestamp,
            duplicate_of: self.duplicate_of,
        }
    }

    /// Overwrites identity and timestamps.
    pub fn set_meta(&mut self, meta: &RecordMeta) {
        self.uuid = meta.uuid;
        self.created_at = meta.created_at.clone();
        self.updated_at = meta.updated_at.clone();
        self.created_at_timestamp = meta.created_at_timestamp;
        self.updated_at_timestamp = meta.updated_at_timestamp;
        self.duplicate_of = meta.duplicate_of;
    }

    /// Returns true if the record body is wrapped by the root key.
    pub fn is_root_wrapped(&self) -> bool {
        self.content_type.is_root_key_encrypted()
    }

    /// Copies the server's modification time onto this record so the next
    /// exchange treats it as current.
    pub fn stamp_server_time(&mut self, server: &EncryptedRecord) {
        self.updated_at = server.updated_at.clone();
        self.updated_at_timestamp = server.updated_at_timestamp;
    }

    /// Returns true if `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &EncryptedRecord) -> bool {
        self.updated_at_timestamp > other.updated_at_timestamp
    }

    /// Builds a tombstone for the given record identity.
    pub fn tombstone(uuid: Uuid, content_type: ContentType) -> Self {
        let (text, micros) = timestamp_now();
        Self {
            uuid,
            wrapping_key_id: None,
            content: String::new(),
            content_type,
            wrapped_key: String::new(),
            deleted: true,
            created_at: text.clone(),
            updated_at: text,
            created_at_timestamp: micros,
            updated_at_timestamp: micros,
            duplicate_of: None,
            auth_hash: None,
        }
    }
}

/// The plaintext result of a successful decryption.
///
/// Only produced by the item codec. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedRecord {
    /// Identity and timestamps.
    pub meta: RecordMeta,
    /// Discriminator.
    pub content_type: ContentType,
    /// Plaintext JSON body.
    pub content: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names() {
        let mut record = EncryptedRecord::tombstone(Uuid::new_v4(), ContentType::Note);
        record.deleted = false;
        record.wrapping_key_id = Some(Uuid::new_v4());
        record.content = "004:aa:bb:cc".into();
        record.wrapped_key = "004:dd:ee:ff".into();

        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        for field in [
            "uuid",
            "items_key_id",
            "content",
            "content_type",
            "enc_item_key",
            "deleted",
            "created_at",
            "updated_at",
            "created_at_timestamp",
            "updated_at_timestamp",
        ] {
            assert!(object.contains_key(field), "missing {field}");
        }
        assert!(!object.contains_key("duplicate_of"));
    }

    #[test]
    fn null_content_reads_as_empty() {
        let json = r#"{
            "uuid": "6f1d9a8e-6a2b-4d55-9a0f-2a3c3a1c7e10",
            "content_type": "Note",
            "content": null,
            "enc_item_key": null,
            "deleted": true,
            "updated_at_timestamp": 17
        }"#;
        let record: EncryptedRecord = serde_json::from_str(json).unwrap();
        assert!(record.deleted);
        assert!(record.content.is_empty());
        assert!(record.wrapped_key.is_empty());
        assert_eq!(record.wrapping_key_id, None);
        assert_eq!(record.updated_at_timestamp, 17);
    }

    #[test]
    fn meta_roundtrip() {
        let mut record = EncryptedRecord::tombstone(Uuid::new_v4(), ContentType::Tag);
        let mut meta = RecordMeta::generate();
        meta.duplicate_of = Some(Uuid::new_v4());
        record.set_meta(&meta);
        assert_eq!(record.meta(), meta);
    }

    #[test]
    fn stamping_and_ordering() {
        let mut local = EncryptedRecord::tombstone(Uuid::new_v4(), ContentType::Note);
        let mut server = local.clone();
        local.updated_at_timestamp = 10;
        server.updated_at_timestamp = 20;
        server.updated_at = "2024-01-01T00:00:00.000020Z".into();

        assert!(server.is_newer_than(&local));
        local.stamp_server_time(&server);
        assert_eq!(local.updated_at_timestamp, 20);
        assert_eq!(local.updated_at, server.updated_at);
        assert!(!server.is_newer_than(&local));
    }
}
