//! Local replica store contract.

use parking_lot::RwLock;
use sealsync_protocol::{ContentType, EncryptedRecord};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a replica store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(Uuid),

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The encrypted local replica.
///
/// Keyed by uuid, with a secondary index on content type, a dirty index,
/// and a single-row table for the sync token. Records are stored exactly
/// as they travel on the wire.
pub trait ReplicaStore: Send + Sync {
    /// Every record.
    fn all(&self) -> StoreResult<Vec<EncryptedRecord>>;

    /// Records of one content type.
    fn by_content_type(&self, content_type: &ContentType) -> StoreResult<Vec<EncryptedRecord>>;

    /// Records with unpushed changes.
    fn dirty(&self) -> StoreResult<Vec<EncryptedRecord>>;

    /// One record.
    fn get(&self, uuid: &Uuid) -> StoreResult<Option<EncryptedRecord>>;

    /// Inserts or replaces a record and sets its dirty flag.
    fn put(&self, record: EncryptedRecord, dirty: bool) -> StoreResult<()>;

    /// Updates the dirty flag of an existing record.
    fn set_dirty(&self, uuid: &Uuid, dirty: bool) -> StoreResult<()>;

    /// Removes a record.
    fn delete(&self, uuid: &Uuid) -> StoreResult<()>;

    /// The current sync token.
    fn sync_token(&self) -> StoreResult<Option<String>>;

    /// Replaces the sync token.
    fn set_sync_token(&self, token: Option<String>) -> StoreResult<()>;

    /// Drops every record and the token.
    fn clear(&self) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<Uuid, EncryptedRecord>,
    by_type: BTreeMap<ContentType, BTreeSet<Uuid>>,
    dirty: BTreeSet<Uuid>,
    sync_token: Option<String>,
}

impl Tables {
    fn unindex(&mut self, uuid: &Uuid) -> Option<EncryptedRecord> {
        let old = self.records.remove(uuid)?;
        if let Some(ids) = self.by_type.get_mut(&old.content_type) {
            ids.remove(uuid);
            if ids.is_empty() {
                self.by_type.remove(&old.content_type);
            }
        }
        Some(old)
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a Uuid>) -> Vec<EncryptedRecord> {
        ids.filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

/// An in-memory replica store.
#[derive(Debug, Default)]
pub struct MemoryReplicaStore {
    tables: RwLock<Tables>,
}

impl MemoryReplicaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.tables.read().records.is_empty()
    }

    /// Returns true if the record has unpushed changes.
    pub fn is_dirty(&self, uuid: &Uuid) -> bool {
        self.tables.read().dirty.contains(uuid)
    }
}

impl ReplicaStore for MemoryReplicaStore {
    fn all(&self) -> StoreResult<Vec<EncryptedRecord>> {
        Ok(self.tables.read().records.values().cloned().collect())
    }

    fn by_content_type(&self, content_type: &ContentType) -> StoreResult<Vec<EncryptedRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .by_type
            .get(content_type)
            .map(|ids| tables.collect(ids.iter()))
            .unwrap_or_default())
    }

    fn dirty(&self) -> StoreResult<Vec<EncryptedRecord>> {
        let tables = self.tables.read();
        Ok(tables.collect(tables.dirty.iter()))
    }

    fn get(&self, uuid: &Uuid) -> StoreResult<Option<EncryptedRecord>> {
        Ok(self.tables.read().records.get(uuid).cloned())
    }

    fn put(&self, record: EncryptedRecord, dirty: bool) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let uuid = record.uuid;
        tables.unindex(&uuid);
        tables
            .by_type
            .entry(record.content_type.clone())
            .or_default()
            .insert(uuid);
        tables.records.insert(uuid, record);
        if dirty {
            tables.dirty.insert(uuid);
        } else {
            tables.dirty.remove(&uuid);
        }
        Ok(())
    }

    fn set_dirty(&self, uuid: &Uuid, dirty: bool) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.records.contains_key(uuid) {
            return Err(StoreError::NotFound(*uuid));
        }
        if dirty {
            tables.dirty.insert(*uuid);
        } else {
            tables.dirty.remove(uuid);
        }
        Ok(())
    }

    fn delete(&self, uuid: &Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.unindex(uuid);
        tables.dirty.remove(uuid);
        Ok(())
    }

    fn sync_token(&self) -> StoreResult<Option<String>> {
        Ok(self.tables.read().sync_token.clone())
    }

    fn set_sync_token(&self, token: Option<String>) -> StoreResult<()> {
        self.tables.write().sync_token = token;
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.tables.write() = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content_type: ContentType) -> EncryptedRecord {
        let mut record = EncryptedRecord::tombstone(Uuid::new_v4(), content_type);
        record.deleted = false;
        record
    }

    #[test]
    fn indexes_follow_puts() {
        let store = MemoryReplicaStore::new();
        let note = record(ContentType::Note);
        let key = record(ContentType::ItemsKey);
        store.put(note.clone(), true).unwrap();
        store.put(key.clone(), false).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.by_content_type(&ContentType::Note).unwrap(), vec![note.clone()]);
        assert_eq!(store.by_content_type(&ContentType::ItemsKey).unwrap(), vec![key]);
        assert!(store.by_content_type(&ContentType::Tag).unwrap().is_empty());
        assert_eq!(store.dirty().unwrap(), vec![note.clone()]);

        store.put(note.clone(), false).unwrap();
        assert!(store.dirty().unwrap().is_empty());
    }

    #[test]
    fn retyping_moves_index_entry() {
        let store = MemoryReplicaStore::new();
        let mut rec = record(ContentType::Note);
        store.put(rec.clone(), false).unwrap();
        rec.content_type = ContentType::Tag;
        store.put(rec.clone(), false).unwrap();
        assert!(store.by_content_type(&ContentType::Note).unwrap().is_empty());
        assert_eq!(store.by_content_type(&ContentType::Tag).unwrap().len(), 1);
    }

    #[test]
    fn dirty_flag_updates() {
        let store = MemoryReplicaStore::new();
        let rec = record(ContentType::Note);
        store.put(rec.clone(), false).unwrap();
        store.set_dirty(&rec.uuid, true).unwrap();
        assert!(store.is_dirty(&rec.uuid));
        store.set_dirty(&rec.uuid, false).unwrap();
        assert!(!store.is_dirty(&rec.uuid));

        assert!(matches!(
            store.set_dirty(&Uuid::new_v4(), true),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_and_clear() {
        let store = MemoryReplicaStore::new();
        let rec = record(ContentType::Note);
        store.put(rec.clone(), true).unwrap();
        store.set_sync_token(Some("t".into())).unwrap();

        store.delete(&rec.uuid).unwrap();
        assert!(store.get(&rec.uuid).unwrap().is_none());
        assert!(store.dirty().unwrap().is_empty());
        assert_eq!(store.sync_token().unwrap().as_deref(), Some("t"));

        store.put(rec, false).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.sync_token().unwrap(), None);
    }
}
