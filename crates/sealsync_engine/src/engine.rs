//! Sync orchestrator.

use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::error::{SyncError, SyncResult};
use crate::pagination::{PageAccumulator, Paginator};
use crate::resilience::{Clock, SyncGate, SystemClock};
use crate::session::Session;
use crate::store::ReplicaStore;
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use sealsync_crypto::Envelope;
use sealsync_protocol::{ContentType, EncryptedRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is exchanging pages with the server.
    Syncing,
    /// Engine is resolving conflicts before resubmitting.
    Resolving,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing | SyncState::Resolving)
    }
}

/// Cumulative statistics across sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of records the server acknowledged.
    pub records_pushed: u64,
    /// Total number of records received.
    pub records_pulled: u64,
    /// Total number of conflicts resolved.
    pub conflicts_resolved: u64,
    /// Total number of page retries.
    pub retries: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Counters for a single cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Pages exchanged.
    pub pages: u32,
    /// Page retries.
    pub retries: u32,
    /// Page-size reductions.
    pub shrinks: u32,
    /// Exchange rounds: 1, or 2 after conflict resolution.
    pub rounds: u32,
    /// Conflicts resolved.
    pub conflicts_resolved: usize,
    /// Records forked under a new identity.
    pub forked: usize,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Received and acknowledged records, one per uuid, newest wins.
    pub items: Vec<EncryptedRecord>,
    /// Records the server acknowledged as saved.
    pub saved: Vec<Uuid>,
    /// Records the server refused without conflict.
    pub unsaved: Vec<EncryptedRecord>,
    /// Identities replaced by forks during conflict resolution.
    pub remapped: BTreeMap<Uuid, Uuid>,
    /// Pushed records whose conflict the server's copy won without a fork,
    /// plus tombstones dropped on a uuid conflict. None of them is pending
    /// any more.
    pub settled: BTreeSet<Uuid>,
    /// New change cursor.
    pub sync_token: Option<String>,
    /// Received records whose wrapping key is unknown.
    pub missing_keys: Vec<Uuid>,
    /// Whether outbound records were held back because of missing keys.
    pub push_withheld: bool,
    /// Per-cycle counters.
    pub stats: CycleStats,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// The missing-key warning to surface to the user, if any.
    pub fn missing_key_warning(&self) -> Option<SyncError> {
        (!self.missing_keys.is_empty()).then(|| SyncError::MissingWrappingKeys {
            records: self.missing_keys.clone(),
        })
    }
}

/// The sync engine pushes local changes and pulls remote ones for one
/// account at a time.
///
/// Calls are serialized: a second caller blocks until the first finishes,
/// then waits out the minimum interval between sync starts.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: T,
    clock: Arc<dyn Clock>,
    gate: SyncGate,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine on the system clock.
    pub fn new(config: SyncConfig, transport: T) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Creates a sync engine with an injected clock.
    pub fn with_clock(config: SyncConfig, transport: T, clock: Arc<dyn Clock>) -> Self {
        Self {
            gate: SyncGate::new(config.min_sync_interval),
            config,
            transport,
            clock,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Pushes `pending` and pulls every remote change since the session's
    /// sync token.
    ///
    /// On success the session's sync token and key hierarchy are updated.
    /// Records referencing unknown wrapping keys are quarantined and, while
    /// any remain, pushes are withheld.
    ///
    /// # Errors
    ///
    /// `MissingDefaultKey` if records are pending and no default key is set,
    /// `SessionExpired` if the access token has expired, and any failure the
    /// pagination or conflict-resolution steps could not recover from.
    pub fn sync(
        &self,
        session: &mut Session,
        pending: Vec<EncryptedRecord>,
    ) -> SyncResult<SyncCycleResult> {
        let mut partial = PageAccumulator::default();
        self.cycle(session, pending, &mut partial)
    }

    /// Runs a full sync against a local replica.
    ///
    /// Dirty records are pushed, results are stored newest-wins, dirty
    /// markers are cleared for acknowledged records, forked identities
    /// replace their originals and the new sync token is persisted. Server
    /// copies that won a conflict replace dirty local records. If the
    /// sync fails, records already received are still stored but the token
    /// is left untouched.
    pub fn sync_replica(
        &self,
        session: &mut Session,
        store: &dyn ReplicaStore,
    ) -> SyncResult<SyncCycleResult> {
        session.set_sync_token(store.sync_token()?);
        let local_keys = store.by_content_type(&ContentType::ItemsKey)?;
        if !local_keys.is_empty() {
            session.load_keys(&local_keys)?;
        }

        let pending = store.dirty()?;
        let mut partial = PageAccumulator::default();
        match self.cycle(session, pending.clone(), &mut partial) {
            Ok(result) => {
                let saved: BTreeSet<Uuid> = result.saved.iter().copied().collect();
                apply_to_store(
                    store,
                    &result.items,
                    &saved,
                    &result.remapped,
                    &result.settled,
                )?;
                store.set_sync_token(result.sync_token.clone())?;
                Ok(result)
            }
            Err(err) => {
                hydrate(&mut partial.saved, &pending);
                let saved: BTreeSet<Uuid> = partial.saved.iter().map(|r| r.uuid).collect();
                let items = newest_by_uuid(partial.retrieved.into_iter().chain(partial.saved));
                if !items.is_empty() {
                    warn!(count = items.len(), error = %err, "storing partial sync results");
                    let stored =
                        apply_to_store(store, &items, &saved, &BTreeMap::new(), &BTreeSet::new());
                    if let Err(store_err) = stored {
                        warn!(error = %store_err, "failed to store partial sync results");
                    }
                }
                Err(err)
            }
        }
    }

    fn cycle(
        &self,
        session: &mut Session,
        pending: Vec<EncryptedRecord>,
        partial: &mut PageAccumulator,
    ) -> SyncResult<SyncCycleResult> {
        let _permit = self.gate.enter(self.clock.as_ref());
        let start = self.clock.now();
        self.set_state(SyncState::Syncing);

        let result = self.run(session, pending, partial);
        let duration = self.clock.now().saturating_duration_since(start);

        let mut stats = self.stats.write();
        stats.retries += u64::from(partial.retries);
        match result {
            Ok(mut result) => {
                result.duration = duration;
                stats.cycles_completed += 1;
                stats.records_pushed += result.saved.len() as u64;
                stats.records_pulled += partial.retrieved.len() as u64;
                stats.conflicts_resolved += result.stats.conflicts_resolved as u64;
                stats.last_sync_time = Some(self.clock.now());
                stats.last_error = None;
                drop(stats);
                self.set_state(SyncState::Synced);
                Ok(result)
            }
            Err(err) => {
                stats.last_error = Some(err.to_string());
                drop(stats);
                warn!(error = %err, fatal = err.is_fatal(), "sync failed");
                self.set_state(SyncState::Error);
                Err(err)
            }
        }
    }

    fn run(
        &self,
        session: &mut Session,
        pending: Vec<EncryptedRecord>,
        partial: &mut PageAccumulator,
    ) -> SyncResult<SyncCycleResult> {
        if !self.config.skip_session_check && session.is_expired(self.clock.utc_now()) {
            return Err(SyncError::SessionExpired);
        }
        if !pending.is_empty() && session.keys().default_key().is_none() {
            return Err(SyncError::MissingDefaultKey);
        }

        let push_withheld = session.push_blocked() && !pending.is_empty();
        let outbound = if push_withheld {
            warn!(
                pending = pending.len(),
                missing = session.missing_keys().len(),
                "withholding push until missing wrapping keys arrive"
            );
            Vec::new()
        } else {
            pending
        };

        if self.config.force_validation {
            for record in &outbound {
                validate_outbound(record)?;
            }
        }

        info!(outbound = outbound.len(), "starting sync");
        let paginator = Paginator::new(&self.transport, &self.config, self.clock.as_ref());
        paginator.run(
            &outbound,
            session.sync_token(),
            session.access_token(),
            partial,
        )?;
        hydrate(&mut partial.saved, &outbound);
        reconcile_keys(session, partial)?;

        let mut stats = CycleStats {
            rounds: 1,
            ..CycleStats::default()
        };
        let mut remapped = BTreeMap::new();
        let mut server_items = Vec::new();
        let mut settled = BTreeSet::new();

        let conflicts = std::mem::take(&mut partial.conflicts);
        if !conflicts.is_empty() {
            self.set_state(SyncState::Resolving);
            stats.conflicts_resolved = conflicts.len();
            let accepted = partial.saved.clone();
            let resolution = ConflictResolver::new(session.codec(), session.keys(), session.root_key())
                .resolve(conflicts, &accepted)?;
            info!(
                conflicts = stats.conflicts_resolved,
                forked = resolution.forked,
                kept_local = resolution.kept_local,
                resubmit = resolution.resubmit.len(),
                "resolved conflicts"
            );
            stats.forked = resolution.forked;
            settled.extend(
                resolution
                    .server_items
                    .iter()
                    .map(|r| r.uuid)
                    .filter(|uuid| !resolution.remap.contains_key(uuid)),
            );
            settled.extend(resolution.dropped);
            remapped = resolution.remap;
            server_items = resolution.server_items;
            load_items_keys(session, &server_items)?;

            if !resolution.resubmit.is_empty() {
                self.set_state(SyncState::Syncing);
                let token = partial
                    .sync_token
                    .clone()
                    .or_else(|| session.sync_token().map(str::to_string));
                paginator.run(
                    &resolution.resubmit,
                    token.as_deref(),
                    session.access_token(),
                    partial,
                )?;
                stats.rounds = 2;
                if !partial.conflicts.is_empty() {
                    return Err(SyncError::ConflictsDidNotConverge {
                        remaining: partial.conflicts.len(),
                    });
                }
                hydrate(&mut partial.saved, &resolution.resubmit);
                reconcile_keys(session, partial)?;
            }
        }

        let items = newest_by_uuid(
            partial
                .retrieved
                .iter()
                .chain(partial.saved.iter())
                .chain(server_items.iter())
                .cloned(),
        );

        let newly_missing = session.update_quarantine(&items);
        if !newly_missing.is_empty() {
            warn!(
                count = newly_missing.len(),
                "received records wrapped by unknown keys; push disabled until they arrive"
            );
        }

        let sync_token = partial
            .sync_token
            .clone()
            .or_else(|| session.sync_token().map(str::to_string));
        session.set_sync_token(sync_token.clone());

        stats.pages = partial.pages;
        stats.retries = partial.retries;
        stats.shrinks = partial.shrinks;

        let saved: Vec<Uuid> = partial
            .saved
            .iter()
            .map(|r| r.uuid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            items = items.len(),
            saved = saved.len(),
            pages = stats.pages,
            rounds = stats.rounds,
            "sync complete"
        );

        Ok(SyncCycleResult {
            items,
            saved,
            unsaved: partial.unsaved.clone(),
            remapped,
            settled,
            sync_token,
            missing_keys: session.missing_keys(),
            push_withheld,
            stats,
            duration: Duration::ZERO,
        })
    }
}

/// Structural checks applied to every outbound record when validation is
/// forced.
fn validate_outbound(record: &EncryptedRecord) -> SyncResult<()> {
    if record.uuid.is_nil() {
        return Err(SyncError::validation("outbound record without uuid"));
    }
    if record.deleted {
        return Ok(());
    }
    if !record.is_root_wrapped() && record.wrapping_key_id.is_none() {
        return Err(SyncError::validation(format!(
            "record {} has no wrapping key id",
            record.uuid
        )));
    }
    for (field, value) in [("content", &record.content), ("enc_item_key", &record.wrapped_key)] {
        value.parse::<Envelope>().map_err(|e| {
            SyncError::validation(format!("record {} has an invalid {field}: {e}", record.uuid))
        })?;
    }
    Ok(())
}

/// Fills acknowledgments returned without content from the records that
/// were pushed, keeping the server's modification time.
fn hydrate(saved: &mut [EncryptedRecord], outbound: &[EncryptedRecord]) {
    let by_uuid: HashMap<Uuid, &EncryptedRecord> = outbound.iter().map(|r| (r.uuid, r)).collect();
    for item in saved.iter_mut().filter(|i| i.content.is_empty()) {
        if let Some(source) = by_uuid.get(&item.uuid) {
            let mut hydrated = (*source).clone();
            hydrated.stamp_server_time(item);
            *item = hydrated;
        }
    }
}

/// Loads items keys from a round, preferring acknowledged copies over
/// received ones.
fn reconcile_keys(session: &mut Session, acc: &PageAccumulator) -> SyncResult<()> {
    load_items_keys(session, acc.retrieved.iter().chain(acc.saved.iter()))
}

/// Loads the items keys among `records`. Later copies of a uuid win.
fn load_items_keys<'r>(
    session: &mut Session,
    records: impl IntoIterator<Item = &'r EncryptedRecord>,
) -> SyncResult<()> {
    let mut keys: BTreeMap<Uuid, EncryptedRecord> = BTreeMap::new();
    for record in records
        .into_iter()
        .filter(|r| r.content_type == ContentType::ItemsKey)
    {
        keys.insert(record.uuid, record.clone());
    }
    if keys.is_empty() {
        return Ok(());
    }
    let records: Vec<EncryptedRecord> = keys.into_values().collect();
    let loaded = session.load_keys(&records)?;
    debug!(loaded, "reconciled items keys");
    Ok(())
}

/// One record per uuid; the latest modification wins and later entries win
/// ties.
fn newest_by_uuid(records: impl IntoIterator<Item = EncryptedRecord>) -> Vec<EncryptedRecord> {
    let mut newest: BTreeMap<Uuid, EncryptedRecord> = BTreeMap::new();
    for record in records {
        match newest.get(&record.uuid) {
            Some(existing) if existing.is_newer_than(&record) => {}
            _ => {
                newest.insert(record.uuid, record);
            }
        }
    }
    newest.into_values().collect()
}

fn apply_to_store(
    store: &dyn ReplicaStore,
    items: &[EncryptedRecord],
    saved: &BTreeSet<Uuid>,
    remapped: &BTreeMap<Uuid, Uuid>,
    settled: &BTreeSet<Uuid>,
) -> SyncResult<()> {
    let dirty: BTreeSet<Uuid> = store.dirty()?.iter().map(|r| r.uuid).collect();
    let received: BTreeSet<Uuid> = items.iter().map(|r| r.uuid).collect();

    for old in remapped.keys().filter(|old| !received.contains(*old)) {
        store.delete(old)?;
    }
    for uuid in settled.iter().filter(|uuid| !received.contains(*uuid)) {
        if store.get(uuid)?.is_some() {
            store.set_dirty(uuid, false)?;
        }
    }

    for item in items {
        if saved.contains(&item.uuid) || settled.contains(&item.uuid) {
            store.put(item.clone(), false)?;
            continue;
        }
        if dirty.contains(&item.uuid) && !remapped.contains_key(&item.uuid) {
            debug!(uuid = %item.uuid, "keeping unpushed local edit over received copy");
            continue;
        }
        match store.get(&item.uuid)? {
            Some(local) if local.is_newer_than(item) => {}
            _ => store.put(item.clone(), false)?,
        }
    }
    Ok(())
}
