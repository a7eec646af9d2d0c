//! Conversion between plaintext records and encrypted records.
//!
//! Each encryption draws a fresh content key. The body is sealed under the
//! content key and the content key is sealed under the resolved wrapping
//! key. Both envelopes are bound to the record identity, its content type
//! and the account key parameters.

use crate::envelope::{open, seal, AuthenticatedData, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::hierarchy::ResolvedKey;
use crate::key::SymmetricKey;
use sealsync_protocol::{
    ContentType, DecryptedRecord, DomainRecord, EncryptedRecord, KeyParams, RecordMeta,
};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Encrypts and decrypts records for one account.
#[derive(Debug, Clone)]
pub struct ItemCodec {
    key_params: KeyParams,
}

impl ItemCodec {
    /// Creates a codec bound to the account's key parameters.
    pub fn new(key_params: KeyParams) -> Self {
        Self { key_params }
    }

    /// Account parameters embedded in every envelope.
    pub fn key_params(&self) -> &KeyParams {
        &self.key_params
    }

    fn binding(&self, uuid: Uuid, content_type: &ContentType) -> AuthenticatedData {
        AuthenticatedData::new(uuid, content_type.clone(), Some(self.key_params.clone()))
    }

    /// Encrypts a plaintext record under `key`.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if the key tier does not match the content
    /// type: items keys are wrapped by the root key and nothing else is.
    pub fn encrypt(
        &self,
        record: &DecryptedRecord,
        key: ResolvedKey<'_>,
    ) -> CryptoResult<EncryptedRecord> {
        let root_type = record.content_type.is_root_key_encrypted();
        if root_type != key.is_root() {
            return Err(CryptoError::invariant(format!(
                "{} record {} cannot be wrapped by the {} key",
                record.content_type,
                record.meta.uuid,
                if key.is_root() { "root" } else { "items" }
            )));
        }

        let binding = self.binding(record.meta.uuid, &record.content_type);
        let content_key = SymmetricKey::generate();
        let content = seal(record.content.as_bytes(), &content_key, &binding)?;
        let wrapped_key = seal(content_key.to_hex().as_bytes(), key.key(), &binding)?;

        let mut encrypted = EncryptedRecord {
            uuid: record.meta.uuid,
            wrapping_key_id: key.wrapping_key_id(),
            content: content.to_string(),
            content_type: record.content_type.clone(),
            wrapped_key: wrapped_key.to_string(),
            deleted: false,
            created_at: String::new(),
            updated_at: String::new(),
            created_at_timestamp: 0,
            updated_at_timestamp: 0,
            duplicate_of: None,
            auth_hash: None,
        };
        encrypted.set_meta(&record.meta);
        Ok(encrypted)
    }

    /// Encrypts a typed record.
    pub fn encrypt_domain(
        &self,
        record: &DomainRecord,
        key: ResolvedKey<'_>,
    ) -> CryptoResult<EncryptedRecord> {
        self.encrypt(&record.to_decrypted()?, key)
    }

    /// Decrypts a record with an already resolved key.
    ///
    /// # Errors
    ///
    /// `CannotDecryptDeleted` for tombstones. Authentication and binding
    /// failures of either envelope are returned as is.
    pub fn decrypt(
        &self,
        record: &EncryptedRecord,
        key: ResolvedKey<'_>,
    ) -> CryptoResult<DecryptedRecord> {
        if record.deleted {
            return Err(CryptoError::CannotDecryptDeleted(record.uuid));
        }
        if record.content.is_empty() || record.wrapped_key.is_empty() {
            return Err(CryptoError::malformed_envelope(format!(
                "record {} has no content or wrapped key",
                record.uuid
            )));
        }

        let binding = self.binding(record.uuid, &record.content_type);

        let wrapped: Envelope = record.wrapped_key.parse()?;
        let content_key_hex = Zeroizing::new(open(&wrapped, key.key(), &binding)?);
        let content_key_hex = std::str::from_utf8(&content_key_hex)
            .map_err(|_| CryptoError::InvalidKeyEncoding("content key is not utf-8".into()))?;
        let content_key = SymmetricKey::from_hex(content_key_hex)?;

        let body: Envelope = record.content.parse()?;
        let plaintext = open(&body, &content_key, &binding)?;
        let content = String::from_utf8(plaintext)
            .map_err(|_| CryptoError::malformed_envelope("content is not utf-8"))?;

        Ok(DecryptedRecord {
            meta: record.meta(),
            content_type: record.content_type.clone(),
            content,
        })
    }

    /// Decrypts and converts to the typed variant.
    ///
    /// # Errors
    ///
    /// Unknown content types fail with `ProtocolError::UnknownContentType`.
    pub fn decode(
        &self,
        record: &EncryptedRecord,
        key: ResolvedKey<'_>,
    ) -> CryptoResult<DomainRecord> {
        Ok(DomainRecord::from_decrypted(self.decrypt(record, key)?)?)
    }

    /// Re-encrypts a record under a new identity. Used when forking a record
    /// during conflict resolution.
    pub fn fork(
        &self,
        record: &DecryptedRecord,
        new_meta: RecordMeta,
        key: ResolvedKey<'_>,
    ) -> CryptoResult<EncryptedRecord> {
        let forked = DecryptedRecord {
            meta: new_meta,
            content_type: record.content_type.clone(),
            content: record.content.clone(),
        };
        self.encrypt(&forked, key)
    }
}
