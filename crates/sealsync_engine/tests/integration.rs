//! Integration tests for the sync engine against an in-memory server.

use proptest::prelude::*;
use sealsync_engine::{
    request_timeout, MemoryReplicaStore, ReplicaStore, RetryConfig, Session, SyncError, SyncState,
};
use sealsync_protocol::{Content, EncryptedRecord, RecordContent};
use sealsync_testkit::prelude::*;
use sealsync_testkit::Fault;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn edit(session: &Session, record: &EncryptedRecord, text: &str) -> EncryptedRecord {
    let mut decoded = session.decrypt(record).unwrap();
    if let Content::Note(note) = &mut decoded.content {
        note.text = text.to_string();
    }
    session.encrypt(&decoded).unwrap()
}

fn find<'a>(items: &'a [EncryptedRecord], uuid: Uuid) -> &'a EncryptedRecord {
    items.iter().find(|r| r.uuid == uuid).unwrap()
}

#[test]
fn test_create_sync_and_resync() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, _clock) = engine(&remote);
    let (mut session, key_record) = account.registered_session();
    let store = MemoryReplicaStore::new();

    let record = session.encrypt(&note("A", "first note")).unwrap();
    store.put(key_record.clone(), true).unwrap();
    store.put(record.clone(), true).unwrap();

    let first = engine.sync_replica(&mut session, &store).unwrap();
    assert!(first.saved.contains(&record.uuid));
    assert!(first.saved.contains(&key_record.uuid));
    assert!(store.dirty().unwrap().is_empty());
    assert_eq!(store.sync_token().unwrap(), Some(remote.current_token()));
    assert_eq!(remote.len(), 2);
    assert_eq!(
        store.get(&record.uuid).unwrap().unwrap().updated_at_timestamp,
        remote.get(&record.uuid).unwrap().updated_at_timestamp
    );

    let token = store.sync_token().unwrap();
    let second = engine.sync_replica(&mut session, &store).unwrap();
    assert!(second.items.is_empty());
    assert!(second.saved.is_empty());
    assert_eq!(store.sync_token().unwrap(), token);
    assert_eq!(engine.stats().cycles_completed, 2);
    assert_eq!(engine.state(), SyncState::Synced);
}

#[test]
fn test_second_device_receives_keys_and_records() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine_a, _) = engine(&remote);
    let (engine_b, _) = engine(&remote);

    let (mut first, key_record) = account.registered_session();
    let shared = note("shared", "hello");
    let mut pending = vec![key_record];
    pending.extend(seal_all(&first, &[shared.clone()]));
    engine_a.sync(&mut first, pending).unwrap();

    let mut second = account.session();
    let result = engine_b.sync(&mut second, vec![]).unwrap();
    assert_eq!(result.items.len(), 2);
    assert!(result.missing_keys.is_empty());
    assert_eq!(
        second.keys().default_key().map(|k| k.uuid()),
        first.keys().default_key().map(|k| k.uuid())
    );

    let decoded = second.decrypt(find(&result.items, shared.uuid())).unwrap();
    assert_eq!(decoded.content, shared.content);
}

#[test]
fn test_pagination_survives_one_too_large_page() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (writer, key_record) = account.registered_session();
    remote.inject(key_record);
    let notes: Vec<_> = (0..9).map(|i| note(&format!("n{i}"), "body")).collect();
    for record in seal_all(&writer, &notes) {
        remote.inject(record);
    }
    remote.set_max_page_size(3);
    remote.fail_request(2, Fault::Status(413));

    let (engine, clock) = engine(&remote);
    let mut session = account.session();
    let result = engine.sync(&mut session, vec![]).unwrap();

    assert_eq!(result.items.len(), 10);
    assert_eq!(result.stats.pages, 4);
    assert_eq!(result.stats.retries, 1);
    assert_eq!(result.stats.shrinks, 1);
    assert!(clock.sleeps().is_empty());

    let requests = remote.requests();
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[1].limit, 150);
    assert_eq!(requests[2].limit, 37);
    assert_eq!(requests[1].cursor_token, requests[2].cursor_token);
    assert_eq!(session.decrypt_all(&result.items).unwrap().len(), 10);
}

#[test]
fn test_push_resumes_after_shrink() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, _) = engine_with_config(&remote, test_config().with_page_size(4));
    let (mut session, key_record) = account.registered_session();
    let notes: Vec<_> = (0..7).map(|i| note(&format!("n{i}"), "body")).collect();
    let mut pending = vec![key_record];
    pending.extend(seal_all(&session, &notes));
    remote.fail_request(2, Fault::ConnectionReset);

    let result = engine.sync(&mut session, pending.clone()).unwrap();
    assert_eq!(result.saved.len(), 8);
    assert_eq!(remote.len(), 8);

    let pushed: Vec<Uuid> = remote
        .requests()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .flat_map(|(_, r)| r.items.iter().map(|i| i.uuid))
        .collect();
    let expected: Vec<Uuid> = pending.iter().map(|r| r.uuid).collect();
    assert_eq!(pushed, expected);
}

#[test]
fn test_conflicts_converge_in_one_extra_round() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine_a, _) = engine(&remote);
    let (engine_b, _) = engine(&remote);

    // Device A creates three notes.
    let (mut a, key_record) = account.registered_session();
    let shared: Vec<_> = (0..3).map(|i| note(&format!("s{i}"), "v1")).collect();
    let mut pending = vec![key_record];
    pending.extend(seal_all(&a, &shared));
    let created = engine_a.sync(&mut a, pending).unwrap();

    // Device B pulls them.
    let mut b = account.session();
    let pulled = engine_b.sync(&mut b, vec![]).unwrap();

    // A edits all three on top of the server copies.
    let edits: Vec<_> = shared
        .iter()
        .map(|n| edit(&a, find(&created.items, n.uuid()), "v2 from a"))
        .collect();
    engine_a.sync(&mut a, edits).unwrap();

    // B edits its stale copies and creates two notes whose uuids are taken,
    // plus a tag pointing at a stale note and a colliding note.
    let mut stale: Vec<_> = shared
        .iter()
        .map(|n| edit(&b, find(&pulled.items, n.uuid()), "v2 from b"))
        .collect();
    let colliding: Vec<_> = (0..2).map(|i| note(&format!("u{i}"), "mine")).collect();
    for record in &colliding {
        remote.reserve_uuid(record.uuid());
    }
    let grouping = tag("group", &[shared[0].uuid(), colliding[0].uuid()]);
    stale.extend(seal_all(&b, &colliding));
    stale.extend(seal_all(&b, &[grouping.clone()]));

    let result = engine_b.sync(&mut b, stale).unwrap();
    assert_eq!(result.stats.rounds, 2);
    assert_eq!(result.stats.conflicts_resolved, 5);
    assert_eq!(result.stats.forked, 5);
    assert_eq!(result.remapped.len(), 5);

    for n in &shared {
        let fork_uuid = result.remapped[&n.uuid()];
        let fork = remote.get(&fork_uuid).unwrap();
        assert_eq!(fork.duplicate_of, Some(n.uuid()));
        let text = match b.decrypt(&fork).unwrap().content {
            Content::Note(note) => note.text,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(text, "v2 from b");

        let server = b.decrypt(find(&result.items, n.uuid())).unwrap();
        match server.content {
            Content::Note(note) => assert_eq!(note.text, "v2 from a"),
            other => panic!("unexpected {other:?}"),
        }
    }
    for n in &colliding {
        assert!(remote.get(&n.uuid()).is_none());
        let fork = remote.get(&result.remapped[&n.uuid()]).unwrap();
        assert_eq!(fork.duplicate_of, Some(n.uuid()));
    }

    let stored_tag = b.decrypt(&remote.get(&grouping.uuid()).unwrap()).unwrap();
    let targets: BTreeSet<Uuid> = stored_tag.references().iter().map(|r| r.uuid).collect();
    let expected: BTreeSet<Uuid> = [
        result.remapped[&shared[0].uuid()],
        result.remapped[&colliding[0].uuid()],
    ]
    .into_iter()
    .collect();
    assert_eq!(targets, expected);
}

#[test]
fn test_rate_limit_backoff_sequence() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, clock) = engine(&remote);
    for n in 1..=3 {
        remote.fail_request(n, Fault::RateLimited(None));
    }

    let mut session = account.session();
    let result = engine.sync(&mut session, vec![]).unwrap();
    assert_eq!(result.stats.retries, 3);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );
}

#[test]
fn test_retries_exhausted_keeps_cause() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, _) = engine(&remote);
    for n in 1..=4 {
        remote.fail_request(n, Fault::Status(503));
    }

    let err = engine.sync(&mut account.session(), vec![]).unwrap_err();
    match err {
        SyncError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*source, SyncError::Server { status: 503, .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(engine.state(), SyncState::Error);
}

#[test]
fn test_expired_session_is_not_retried() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, clock) = engine(&remote);
    remote.fail_request(1, Fault::Status(498));

    let err = engine.sync(&mut account.session(), vec![]).unwrap_err();
    assert!(matches!(err, SyncError::SessionExpired));
    assert!(err.is_fatal());
    assert_eq!(remote.requests().len(), 1);
    assert!(clock.sleeps().is_empty());
}

#[test]
fn test_missing_key_quarantine_withholds_push() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine_a, _) = engine(&remote);
    let (engine_b, _) = engine(&remote);

    let (mut a, key_record) = account.registered_session();
    engine_a.sync(&mut a, vec![key_record]).unwrap();
    let mut b = account.session();
    engine_b.sync(&mut b, vec![]).unwrap();

    // A rotates its default key but only pushes a record wrapped by it.
    let rotated = a.create_default_key().unwrap();
    let orphan = a.encrypt(&note("orphan", "body")).unwrap();
    engine_a.sync(&mut a, vec![orphan.clone()]).unwrap();

    let result = engine_b.sync(&mut b, vec![]).unwrap();
    assert_eq!(result.missing_keys, vec![orphan.uuid]);
    assert!(matches!(
        result.missing_key_warning(),
        Some(SyncError::MissingWrappingKeys { ref records }) if records == &vec![orphan.uuid]
    ));
    assert!(b.push_blocked());

    let local = b.encrypt(&note("local", "body")).unwrap();
    let withheld = engine_b.sync(&mut b, vec![local.clone()]).unwrap();
    assert!(withheld.push_withheld);
    assert!(remote.get(&local.uuid).is_none());

    engine_a.sync(&mut a, vec![rotated]).unwrap();
    let healed = engine_b.sync(&mut b, vec![local.clone()]).unwrap();
    assert!(healed.push_withheld);
    assert!(healed.missing_keys.is_empty());
    assert!(!b.push_blocked());

    let pushed = engine_b.sync(&mut b, vec![local.clone()]).unwrap();
    assert!(!pushed.push_withheld);
    assert!(pushed.saved.contains(&local.uuid));
    assert!(remote.get(&local.uuid).is_some());
}

#[test]
fn test_sync_starts_are_paced() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, clock) = engine_with_config(
        &remote,
        test_config().with_min_sync_interval(Duration::from_millis(500)),
    );
    let mut session = account.session();

    engine.sync(&mut session, vec![]).unwrap();
    assert!(clock.sleeps().is_empty());
    engine.sync(&mut session, vec![]).unwrap();
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
}

#[test]
fn test_concurrent_syncs_are_serialized() {
    let remote = RemoteFixture::new();
    let account = TestAccount::new("alice@example.com");
    let (engine, _) = engine(&remote);
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let (mut session, key_record) = account.registered_session();
            let record = session.encrypt(&note(&format!("t{i}"), "body")).unwrap();
            std::thread::spawn(move || {
                engine
                    .sync(&mut session, vec![key_record, record])
                    .map(|r| r.saved.len())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }
    assert_eq!(remote.len(), 8);
    assert_eq!(engine.stats().cycles_completed, 4);
}

#[test]
fn test_set_default_is_idempotent() {
    let account = TestAccount::new("alice@example.com");
    let (mut session, _) = account.registered_session();
    let first = session.keys().default_key().unwrap().uuid();
    let old_record = session.encrypt(&note("old", "body")).unwrap();
    session.create_default_key().unwrap();
    let new_record = session.encrypt(&note("new", "body")).unwrap();

    session.keys_mut().set_default(first).unwrap();
    session.keys_mut().set_default(first).unwrap();

    let defaults = session.keys().iter().filter(|k| k.is_default()).count();
    assert_eq!(defaults, 1);
    assert_eq!(session.keys().default_key().unwrap().uuid(), first);
    assert!(session.decrypt(&old_record).is_ok());
    assert!(session.decrypt(&new_record).is_ok());
}

#[test]
fn test_timeout_scales_with_batch() {
    for (count, secs) in [(5, 30), (50, 60), (500, 120), (2000, 240), (10_000, 240)] {
        assert_eq!(request_timeout(count), Duration::from_secs(secs));
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(record in domain_record_strategy()) {
        let (session, _) = TestAccount::new("prop@example.com").registered_session();
        let encrypted = session.encrypt(&record).unwrap();
        prop_assert_eq!(encrypted.uuid, record.uuid());
        prop_assert_eq!(encrypted.duplicate_of, record.meta.duplicate_of);
        prop_assert_eq!(session.decrypt(&encrypted).unwrap(), record);
    }

    #[test]
    fn prop_backoff_is_monotonic_and_capped((initial, max, multiplier) in backoff_strategy()) {
        let retry = RetryConfig::new()
            .with_initial_delay(initial)
            .with_max_delay(max)
            .with_backoff_multiplier(multiplier);
        let delays: Vec<Duration> = (1..=12).map(|n| retry.delay_for_attempt(n)).collect();
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        prop_assert!(delays.iter().all(|d| *d <= max));
        if let Some(first_capped) = delays.iter().position(|d| *d == max) {
            prop_assert!(delays[first_capped..].iter().all(|d| *d == max));
        }
    }
}
