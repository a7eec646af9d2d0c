//! Key hierarchy: root key, items keys and key resolution.

use crate::codec::ItemCodec;
use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use crate::root_key::RootKey;
use sealsync_protocol::{
    Content, ContentType, DomainRecord, EncryptedRecord, ItemsKeyContent, RecordMeta,
};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// A decrypted wrapping key.
#[derive(Clone)]
pub struct ItemsKey {
    meta: RecordMeta,
    key: SymmetricKey,
    is_default: bool,
}

impl ItemsKey {
    /// Generates a new random items key.
    #[must_use]
    pub fn generate(is_default: bool) -> Self {
        Self {
            meta: RecordMeta::generate(),
            key: SymmetricKey::generate(),
            is_default,
        }
    }

    /// Builds an items key from its decoded record.
    pub fn from_content(meta: RecordMeta, content: &ItemsKeyContent) -> CryptoResult<Self> {
        Ok(Self {
            key: SymmetricKey::from_hex(&content.items_key)?,
            is_default: content.is_default,
            meta,
        })
    }

    /// Identity.
    pub fn uuid(&self) -> Uuid {
        self.meta.uuid
    }

    /// Key material.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Whether this key wraps new records.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Identity and timestamps.
    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    /// Creation time in microseconds.
    pub fn created_at_timestamp(&self) -> i64 {
        self.meta.created_at_timestamp
    }

    /// Typed record for this key, ready to be sealed by the root key.
    pub fn to_domain_record(&self) -> DomainRecord {
        DomainRecord {
            meta: self.meta.clone(),
            content: Content::ItemsKey(ItemsKeyContent::new(
                self.key.to_hex().as_str(),
                self.is_default,
            )),
        }
    }
}

impl std::fmt::Debug for ItemsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemsKey")
            .field("uuid", &self.meta.uuid)
            .field("key", &"[REDACTED]")
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// The key that decrypts a particular record.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedKey<'a> {
    /// Root master key, for items key records.
    Root(&'a SymmetricKey),
    /// An items key, for everything else.
    Items(&'a ItemsKey),
}

impl<'a> ResolvedKey<'a> {
    /// Key material.
    pub fn key(&self) -> &'a SymmetricKey {
        match self {
            ResolvedKey::Root(key) => key,
            ResolvedKey::Items(items_key) => items_key.key(),
        }
    }

    /// Value for `EncryptedRecord::wrapping_key_id`.
    pub fn wrapping_key_id(&self) -> Option<Uuid> {
        match self {
            ResolvedKey::Root(_) => None,
            ResolvedKey::Items(items_key) => Some(items_key.uuid()),
        }
    }

    /// Returns true for the root tier.
    pub fn is_root(&self) -> bool {
        matches!(self, ResolvedKey::Root(_))
    }
}

/// Decrypts every items key record in `records` with the root key.
///
/// Records of other types are ignored and deleted items keys are skipped.
///
/// # Errors
///
/// The whole batch fails if any items key record lacks an identity or key
/// material, appears twice, or does not decrypt.
pub fn decrypt_wrapping_keys(
    codec: &ItemCodec,
    root_key: &RootKey,
    records: &[EncryptedRecord],
) -> CryptoResult<Vec<ItemsKey>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();

    for record in records
        .iter()
        .filter(|r| r.content_type == ContentType::ItemsKey)
    {
        if record.uuid.is_nil() {
            return Err(CryptoError::malformed_key_record(record.uuid, "missing uuid"));
        }
        if !seen.insert(record.uuid) {
            return Err(CryptoError::invariant(format!(
                "duplicate items key {} in batch",
                record.uuid
            )));
        }
        if record.deleted {
            continue;
        }
        if record.wrapped_key.is_empty() || record.content.is_empty() {
            return Err(CryptoError::malformed_key_record(
                record.uuid,
                "missing wrapped key material",
            ));
        }

        let decoded = codec.decode(record, ResolvedKey::Root(root_key.master_key()))?;
        let Content::ItemsKey(content) = &decoded.content else {
            return Err(CryptoError::invariant(format!(
                "items key record {} decoded as {}",
                record.uuid,
                decoded.content_type()
            )));
        };
        keys.push(ItemsKey::from_content(decoded.meta.clone(), content)?);
    }

    debug!(count = keys.len(), "decrypted wrapping keys");
    Ok(keys)
}

/// Known items keys and the current default.
#[derive(Debug, Clone, Default)]
pub struct KeyHierarchy {
    keys: BTreeMap<Uuid, ItemsKey>,
    default: Option<Uuid>,
}

impl KeyHierarchy {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known items keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no items key is known.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up an items key.
    pub fn get(&self, uuid: &Uuid) -> Option<&ItemsKey> {
        self.keys.get(uuid)
    }

    /// Returns true if the key is known.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.keys.contains_key(uuid)
    }

    /// The key that wraps newly created records.
    pub fn default_key(&self) -> Option<&ItemsKey> {
        self.default.and_then(|id| self.keys.get(&id))
    }

    /// Iterates over all known keys.
    pub fn iter(&self) -> impl Iterator<Item = &ItemsKey> {
        self.keys.values()
    }

    /// Finds the key that decrypts `record`.
    ///
    /// # Errors
    ///
    /// `MissingKey` if the record names an unknown items key, or names none
    /// and is not of the root-wrapped type.
    pub fn resolve_key<'a>(
        &'a self,
        record: &EncryptedRecord,
        root_key: &'a RootKey,
    ) -> CryptoResult<ResolvedKey<'a>> {
        match record.wrapping_key_id {
            Some(id) => self
                .keys
                .get(&id)
                .map(ResolvedKey::Items)
                .ok_or(CryptoError::MissingKey {
                    uuid: record.uuid,
                    wrapping_key_id: Some(id),
                }),
            None if record.is_root_wrapped() => Ok(ResolvedKey::Root(root_key.master_key())),
            None => Err(CryptoError::MissingKey {
                uuid: record.uuid,
                wrapping_key_id: None,
            }),
        }
    }

    /// Marks `uuid` as the only default key. Older keys stay resolvable.
    pub fn set_default(&mut self, uuid: Uuid) -> CryptoResult<()> {
        if !self.keys.contains_key(&uuid) {
            return Err(CryptoError::MissingKey {
                uuid,
                wrapping_key_id: Some(uuid),
            });
        }
        for (id, key) in &mut self.keys {
            key.is_default = *id == uuid;
        }
        self.default = Some(uuid);
        Ok(())
    }

    /// Inserts or replaces one key. An existing key is replaced only by a
    /// copy that is at least as recent.
    pub fn upsert(&mut self, key: ItemsKey) {
        let replace = self
            .keys
            .get(&key.uuid())
            .map_or(true, |old| key.meta.updated_at_timestamp >= old.meta.updated_at_timestamp);
        if replace {
            self.keys.insert(key.uuid(), key);
        }
    }

    /// Merges keys received from a sync and re-elects the default.
    ///
    /// When several keys claim to be default the newest by creation time
    /// wins. If none does, the current default is kept.
    pub fn ingest(&mut self, keys: impl IntoIterator<Item = ItemsKey>) -> CryptoResult<()> {
        for key in keys {
            self.upsert(key);
        }

        let elected = self
            .keys
            .values()
            .filter(|k| k.is_default)
            .max_by_key(|k| (k.created_at_timestamp(), k.uuid()))
            .map(ItemsKey::uuid);

        match elected.or(self.default) {
            Some(id) => self.set_default(id),
            None => Ok(()),
        }
    }

    /// Creates a new items key and makes it the default.
    pub fn generate_default(&mut self) -> &ItemsKey {
        let key = ItemsKey::generate(true);
        let uuid = key.uuid();
        self.keys.insert(uuid, key);
        for (id, key) in &mut self.keys {
            key.is_default = *id == uuid;
        }
        self.default = Some(uuid);
        &self.keys[&uuid]
    }
}

/// Seals an items key under the root key.
pub fn wrap_items_key(
    codec: &ItemCodec,
    root_key: &RootKey,
    key: &ItemsKey,
) -> CryptoResult<EncryptedRecord> {
    codec.encrypt_domain(
        &key.to_domain_record(),
        ResolvedKey::Root(root_key.master_key()),
    )
}
