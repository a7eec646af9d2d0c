//! Conflict resolution between a rejected push and the server's state.
//!
//! Local changes win when they are newer or the server copy is a
//! tombstone. Otherwise the local record is forked under a fresh identity
//! so that no edit is lost. Forking changes identities, so every record
//! about to be resubmitted has its references rewritten to follow the fork.

use crate::error::{SyncError, SyncResult};
use sealsync_crypto::{ItemCodec, ItemsKey, KeyHierarchy, ResolvedKey, RootKey};
use sealsync_protocol::{
    ConflictKind, ConflictedRecord, DecryptedRecord, DomainRecord, EncryptedRecord,
    RecordContent, RecordMeta,
};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Outcome of resolving one batch of conflicts.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Records to push in the next round.
    pub resubmit: Vec<EncryptedRecord>,
    /// Old identity to forked identity.
    pub remap: BTreeMap<Uuid, Uuid>,
    /// Server copies that won and should replace local state.
    pub server_items: Vec<EncryptedRecord>,
    /// Local tombstones whose uuid belongs to another record; nothing is
    /// pushed for them.
    pub dropped: Vec<Uuid>,
    /// Number of records forked.
    pub forked: usize,
    /// Number of records where the local copy won.
    pub kept_local: usize,
}

impl Resolution {
    /// Returns true if nothing needs to be pushed again.
    pub fn is_empty(&self) -> bool {
        self.resubmit.is_empty()
    }
}

struct PendingFork {
    source: DecryptedRecord,
    meta: RecordMeta,
}

/// Resolves conflicts for one account.
pub struct ConflictResolver<'a> {
    codec: &'a ItemCodec,
    keys: &'a KeyHierarchy,
    root_key: &'a RootKey,
}

impl<'a> ConflictResolver<'a> {
    /// Creates a resolver over the session's keys.
    pub fn new(codec: &'a ItemCodec, keys: &'a KeyHierarchy, root_key: &'a RootKey) -> Self {
        Self {
            codec,
            keys,
            root_key,
        }
    }

    fn default_key(&self) -> SyncResult<&'a ItemsKey> {
        self.keys.default_key().ok_or(SyncError::MissingDefaultKey)
    }

    /// Resolves `conflicts` and rewrites references in `others`.
    ///
    /// `others` are the outbound records of the same batch that were
    /// accepted, carrying the server's modification time. Only those whose
    /// references changed are included in [`Resolution::resubmit`].
    ///
    /// # Errors
    ///
    /// `InvariantViolation` for a conflict that lacks the records its kind
    /// requires, for a uuid conflict on an items key, and for a record that
    /// needs re-encryption but is not wrapped by the default key.
    pub fn resolve(
        &self,
        conflicts: Vec<ConflictedRecord>,
        others: &[EncryptedRecord],
    ) -> SyncResult<Resolution> {
        let mut resolution = Resolution::default();
        let mut kept = Vec::new();
        let mut forks = Vec::new();

        for conflict in conflicts {
            let ConflictedRecord {
                kind,
                server_item,
                unsaved_item,
            } = conflict;
            let local = unsaved_item
                .ok_or_else(|| SyncError::invariant(format!("{kind:?} without unsaved item")))?;

            match kind {
                ConflictKind::SyncConflict => {
                    let server = server_item.ok_or_else(|| {
                        SyncError::invariant(format!("sync conflict on {} without server item", local.uuid))
                    })?;

                    if local.is_root_wrapped() {
                        debug!(uuid = %local.uuid, "items key conflict, keeping server copy");
                        resolution.server_items.push(server);
                        continue;
                    }

                    if server.deleted || local.is_newer_than(&server) {
                        let mut local = local;
                        local.stamp_server_time(&server);
                        resolution.kept_local += 1;
                        kept.push(local);
                        continue;
                    }

                    let duplicate_of = server.uuid;
                    resolution.server_items.push(server);
                    if !local.deleted {
                        forks.push(self.prepare_fork(&local, duplicate_of, &mut resolution.remap)?);
                    }
                }
                ConflictKind::UuidConflict => {
                    if local.is_root_wrapped() {
                        return Err(SyncError::invariant(format!(
                            "uuid conflict on items key {}",
                            local.uuid
                        )));
                    }
                    if local.deleted {
                        debug!(uuid = %local.uuid, "dropping tombstone on uuid conflict");
                        resolution.dropped.push(local.uuid);
                    } else {
                        forks.push(self.prepare_fork(&local, local.uuid, &mut resolution.remap)?);
                    }
                }
            }
        }

        for fork in forks {
            let PendingFork { mut source, meta } = fork;
            if source.content_type.is_known() {
                let mut domain = DomainRecord::from_decrypted(source)?;
                domain.remap_references(&resolution.remap);
                source = domain.to_decrypted()?;
            }
            let default = self.default_key()?;
            let forked = self
                .codec
                .fork(&source, meta, ResolvedKey::Items(default))?;
            debug!(from = %source.meta.uuid, to = %forked.uuid, "forked conflicting record");
            resolution.resubmit.push(forked);
            resolution.forked += 1;
        }

        for record in kept {
            let rewritten = self.rewrite(&record, &resolution.remap)?;
            resolution.resubmit.push(rewritten.unwrap_or(record));
        }

        for record in others {
            if let Some(rewritten) = self.rewrite(record, &resolution.remap)? {
                resolution.resubmit.push(rewritten);
            }
        }

        Ok(resolution)
    }

    fn prepare_fork(
        &self,
        local: &EncryptedRecord,
        duplicate_of: Uuid,
        remap: &mut BTreeMap<Uuid, Uuid>,
    ) -> SyncResult<PendingFork> {
        let key = self.keys.resolve_key(local, self.root_key)?;
        let source = self.codec.decrypt(local, key)?;
        let meta = RecordMeta {
            uuid: Uuid::new_v4(),
            duplicate_of: Some(duplicate_of),
            ..source.meta.clone()
        };
        remap.insert(local.uuid, meta.uuid);
        Ok(PendingFork { source, meta })
    }

    /// Re-encrypts `record` if any of its references was forked.
    fn rewrite(
        &self,
        record: &EncryptedRecord,
        remap: &BTreeMap<Uuid, Uuid>,
    ) -> SyncResult<Option<EncryptedRecord>> {
        if remap.is_empty()
            || record.deleted
            || record.is_root_wrapped()
            || !record.content_type.is_known()
        {
            return Ok(None);
        }

        let key = self.keys.resolve_key(record, self.root_key)?;
        let mut domain = self.codec.decode(record, key)?;
        if !domain.remap_references(remap) {
            return Ok(None);
        }

        let default = self.default_key()?;
        if record.wrapping_key_id != Some(default.uuid()) {
            return Err(SyncError::invariant(format!(
                "record {} is wrapped by a non-default key during reference remap",
                record.uuid
            )));
        }
        debug!(uuid = %record.uuid, "rewrote references to forked records");
        Ok(Some(
            self.codec
                .encrypt_domain(&domain, ResolvedKey::Items(default))?,
        ))
    }
}
