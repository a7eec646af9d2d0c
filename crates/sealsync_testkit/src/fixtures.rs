//! Account and engine fixtures.
//!
//! Accounts derive their root key with the cheapest Argon2 cost so tests
//! stay fast. Engines run on a [`ManualClock`] so pacing and backoff never
//! sleep.

use crate::remote::RemoteFixture;
use rand::RngCore;
use sealsync_crypto::{KdfCost, RootKey};
use sealsync_engine::{HttpTransport, ManualClock, Session, SyncConfig, SyncEngine};
use sealsync_protocol::{
    Content, ContentType, DomainRecord, EncryptedRecord, KeyParams, NoteContent, TagContent,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Engine type used against [`RemoteFixture`].
pub type TestEngine = SyncEngine<HttpTransport<Arc<RemoteFixture>>>;

/// Password shared by every test account.
pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// A registered account.
#[derive(Debug, Clone)]
pub struct TestAccount {
    key_params: KeyParams,
}

impl TestAccount {
    /// Registers an account with a random nonce.
    pub fn new(identifier: &str) -> Self {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            key_params: KeyParams::new(identifier, hex::encode(nonce))
                .with_origination("registration"),
        }
    }

    /// The account's key parameters.
    pub fn key_params(&self) -> &KeyParams {
        &self.key_params
    }

    /// Derives the root key from [`TEST_PASSWORD`].
    pub fn root_key(&self) -> RootKey {
        self.root_key_with(TEST_PASSWORD)
    }

    /// Derives the root key from an arbitrary password.
    pub fn root_key_with(&self, password: &str) -> RootKey {
        RootKey::derive(password, self.key_params.clone(), KdfCost::insecure_fast())
            .expect("Failed to derive root key")
    }

    /// A fresh session with no keys loaded.
    pub fn session(&self) -> Session {
        Session::new(self.root_key())
    }

    /// A session holding a new default items key, with the key's record
    /// ready to push.
    pub fn registered_session(&self) -> (Session, EncryptedRecord) {
        let mut session = self.session();
        let key_record = session
            .create_default_key()
            .expect("Failed to create default key");
        (session, key_record)
    }
}

/// Configuration used by [`engine`]: default paging, no pacing.
pub fn test_config() -> SyncConfig {
    SyncConfig::new(crate::remote::REMOTE_URL).with_min_sync_interval(Duration::ZERO)
}

/// An engine talking to `remote` on a manual clock.
pub fn engine(remote: &Arc<RemoteFixture>) -> (TestEngine, Arc<ManualClock>) {
    engine_with_config(remote, test_config())
}

/// An engine with a custom configuration.
pub fn engine_with_config(
    remote: &Arc<RemoteFixture>,
    config: SyncConfig,
) -> (TestEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let engine = SyncEngine::with_clock(config, remote.transport(), clock.clone());
    (engine, clock)
}

/// A new note.
pub fn note(title: &str, text: &str) -> DomainRecord {
    DomainRecord::new(Content::Note(NoteContent::new(title, text)))
}

/// A new tag pointing at `notes`.
pub fn tag(title: &str, notes: &[Uuid]) -> DomainRecord {
    let content = notes
        .iter()
        .fold(TagContent::new(title), |tag, uuid| {
            tag.with_reference(*uuid, ContentType::Note)
        });
    DomainRecord::new(Content::Tag(content))
}

/// Encrypts records for push.
pub fn seal_all(session: &Session, records: &[DomainRecord]) -> Vec<EncryptedRecord> {
    records
        .iter()
        .map(|r| session.encrypt(r).expect("Failed to encrypt record"))
        .collect()
}
