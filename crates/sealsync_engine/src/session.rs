//! Per-account session state carried across syncs.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use sealsync_crypto::{
    decrypt_wrapping_keys, wrap_items_key, ItemCodec, KeyHierarchy, ResolvedKey, RootKey,
};
use sealsync_protocol::{DomainRecord, EncryptedRecord};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Keys, tokens and quarantine state of one signed-in account.
///
/// Only the orchestrator mutates the default key and the sync token, and
/// only after a successful round.
pub struct Session {
    root_key: RootKey,
    codec: ItemCodec,
    keys: KeyHierarchy,
    sync_token: Option<String>,
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    missing_keys: BTreeMap<Uuid, Option<Uuid>>,
}

impl Session {
    /// Opens a session for the account owning `root_key`.
    pub fn new(root_key: RootKey) -> Self {
        Self {
            codec: ItemCodec::new(root_key.key_params().clone()),
            root_key,
            keys: KeyHierarchy::new(),
            sync_token: None,
            access_token: None,
            expires_at: None,
            missing_keys: BTreeMap::new(),
        }
    }

    /// Attaches the bearer token and its expiry.
    pub fn with_access_token(
        mut self,
        token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.access_token = Some(token.into());
        self.expires_at = expires_at;
        self
    }

    /// Resumes from a previously stored sync token.
    pub fn with_sync_token(mut self, token: Option<String>) -> Self {
        self.sync_token = token;
        self
    }

    /// The root key.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// The record codec for this account.
    pub fn codec(&self) -> &ItemCodec {
        &self.codec
    }

    /// Known items keys.
    pub fn keys(&self) -> &KeyHierarchy {
        &self.keys
    }

    /// Mutable access to the key hierarchy.
    pub fn keys_mut(&mut self) -> &mut KeyHierarchy {
        &mut self.keys
    }

    /// The change cursor of the last successful sync.
    pub fn sync_token(&self) -> Option<&str> {
        self.sync_token.as_deref()
    }

    pub(crate) fn set_sync_token(&mut self, token: Option<String>) {
        self.sync_token = token;
    }

    /// The bearer token, if signed in.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns true if the access token has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Records received whose wrapping key has not been seen yet.
    pub fn missing_keys(&self) -> Vec<Uuid> {
        self.missing_keys.keys().copied().collect()
    }

    /// Returns true while pushes are withheld for missing keys.
    pub fn push_blocked(&self) -> bool {
        !self.missing_keys.is_empty()
    }

    /// Generates a new default items key and returns its root-wrapped
    /// record, ready to be pushed.
    pub fn create_default_key(&mut self) -> SyncResult<EncryptedRecord> {
        let key = self.keys.generate_default();
        debug!(uuid = %key.uuid(), "created default items key");
        Ok(wrap_items_key(&self.codec, &self.root_key, key)?)
    }

    /// Encrypts a record for push. Items keys go under the root key and
    /// everything else under the default items key.
    pub fn encrypt(&self, record: &DomainRecord) -> SyncResult<EncryptedRecord> {
        let key = if record.content_type().is_root_key_encrypted() {
            ResolvedKey::Root(self.root_key.master_key())
        } else {
            ResolvedKey::Items(self.keys.default_key().ok_or(SyncError::MissingDefaultKey)?)
        };
        Ok(self.codec.encrypt_domain(record, key)?)
    }

    /// Decrypts one record with whichever key wraps it.
    pub fn decrypt(&self, record: &EncryptedRecord) -> SyncResult<DomainRecord> {
        let key = self.keys.resolve_key(record, &self.root_key)?;
        Ok(self.codec.decode(record, key)?)
    }

    /// Decrypts a batch, skipping tombstones.
    ///
    /// # Errors
    ///
    /// The first record that fails aborts the whole batch.
    pub fn decrypt_all(&self, records: &[EncryptedRecord]) -> SyncResult<Vec<DomainRecord>> {
        records
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| self.decrypt(r))
            .collect()
    }

    /// Decrypts every items key in `records` and merges them into the
    /// hierarchy. Returns the number of keys loaded.
    pub fn load_keys(&mut self, records: &[EncryptedRecord]) -> SyncResult<usize> {
        let keys = decrypt_wrapping_keys(&self.codec, &self.root_key, records)?;
        let count = keys.len();
        self.keys.ingest(keys)?;
        let keys = &self.keys;
        self.missing_keys
            .retain(|_, wrapping| wrapping.map_or(true, |id| !keys.contains(&id)));
        Ok(count)
    }

    /// Re-evaluates which received records cannot be decrypted. Returns the
    /// records newly found to reference an unknown key.
    pub(crate) fn update_quarantine(&mut self, records: &[EncryptedRecord]) -> Vec<Uuid> {
        let mut added = Vec::new();
        for record in records {
            if record.deleted || record.is_root_wrapped() {
                self.missing_keys.remove(&record.uuid);
                continue;
            }
            let resolvable = record
                .wrapping_key_id
                .is_some_and(|id| self.keys.contains(&id));
            if resolvable {
                self.missing_keys.remove(&record.uuid);
            } else if self
                .missing_keys
                .insert(record.uuid, record.wrapping_key_id)
                .is_none()
            {
                warn!(
                    uuid = %record.uuid,
                    wrapping_key = ?record.wrapping_key_id,
                    "record references an unknown wrapping key"
                );
                added.push(record.uuid);
            }
        }
        added
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.root_key.key_params().identifier)
            .field("keys", &self.keys.len())
            .field("sync_token", &self.sync_token)
            .field("access_token", &self.access_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .field("missing_keys", &self.missing_keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealsync_crypto::{CryptoError, KdfCost};
    use sealsync_protocol::{Content, ContentType, KeyParams, NoteContent, RecordContent};

    fn session() -> Session {
        let root = RootKey::derive(
            "pw",
            KeyParams::new("a@example.com", "nonce"),
            KdfCost::insecure_fast(),
        )
        .unwrap();
        Session::new(root)
    }

    fn note(title: &str) -> DomainRecord {
        DomainRecord::new(Content::Note(NoteContent::new(title, "body")))
    }

    #[test]
    fn encrypt_needs_default_key() {
        let mut session = session();
        assert!(matches!(
            session.encrypt(&note("a")),
            Err(SyncError::MissingDefaultKey)
        ));

        let key_record = session.create_default_key().unwrap();
        assert_eq!(key_record.content_type, ContentType::ItemsKey);
        assert_eq!(key_record.wrapping_key_id, None);

        let record = note("a");
        let encrypted = session.encrypt(&record).unwrap();
        assert_eq!(
            encrypted.wrapping_key_id,
            session.keys().default_key().map(|k| k.uuid())
        );
        assert_eq!(session.decrypt(&encrypted).unwrap(), record);
    }

    #[test]
    fn keys_load_from_another_device() {
        let mut first = session();
        let key_record = first.create_default_key().unwrap();
        let encrypted = first.encrypt(&note("shared")).unwrap();

        let mut second = session();
        assert_eq!(second.load_keys(&[key_record, encrypted.clone()]).unwrap(), 1);
        assert_eq!(
            second.keys().default_key().map(|k| k.uuid()),
            first.keys().default_key().map(|k| k.uuid())
        );
        assert_eq!(second.decrypt(&encrypted).unwrap().title(), Some("shared"));
    }

    #[test]
    fn decrypt_all_aborts_on_first_failure() {
        let mut session = session();
        session.create_default_key().unwrap();
        let good = session.encrypt(&note("good")).unwrap();
        let tombstone = EncryptedRecord::tombstone(Uuid::new_v4(), ContentType::Note);
        assert_eq!(
            session.decrypt_all(&[good.clone(), tombstone]).unwrap().len(),
            1
        );

        let mut orphan = good.clone();
        orphan.wrapping_key_id = Some(Uuid::new_v4());
        assert!(matches!(
            session.decrypt_all(&[good, orphan]),
            Err(SyncError::Crypto(CryptoError::MissingKey { .. }))
        ));
    }

    #[test]
    fn quarantine_tracks_unknown_keys() {
        let mut first = session();
        let key_record = first.create_default_key().unwrap();
        let encrypted = first.encrypt(&note("x")).unwrap();

        let mut second = session();
        assert_eq!(second.update_quarantine(&[encrypted.clone()]), vec![encrypted.uuid]);
        assert!(second.push_blocked());
        assert!(second.update_quarantine(&[encrypted.clone()]).is_empty());

        second.load_keys(&[key_record]).unwrap();
        assert!(!second.push_blocked());
        assert!(second.missing_keys().is_empty());
    }

    #[test]
    fn expiry() {
        let now = Utc::now();
        let expiring = session().with_access_token("t", Some(now));
        assert!(expiring.is_expired(now));
        assert!(!expiring.is_expired(now - chrono::Duration::seconds(1)));
        assert!(!session().is_expired(now));
    }

    #[test]
    fn debug_redacts_token() {
        let signed_in = session().with_access_token("secret-token", None);
        let rendered = format!("{signed_in:?}");
        assert!(!rendered.contains("secret-token"));
    }
}
