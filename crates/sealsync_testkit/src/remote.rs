//! A cooperative in-memory sync server.
//!
//! Implements [`HttpClient`] so the engine's real HTTP transport, status
//! handling and JSON codec are exercised end to end. Several engines can
//! share one fixture to simulate multiple devices on the same account.
//!
//! Semantics:
//! - every accepted write gets a sequence number and a server timestamp
//!   strictly greater than the previous one
//! - the sync token is the highest sequence number at the end of a request
//! - a pull returns records with a sequence number after the token, up to
//!   the sequence number observed on the first page of the sync
//! - a push whose `updated_at_timestamp` is older than the stored copy is a
//!   sync conflict; a push of a reserved uuid is a uuid conflict
//! - acknowledgments are returned without content

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use sealsync_engine::{
    HttpClient, HttpRequest, HttpResponse, HttpTransport, TransportError, SYNC_PATH,
};
use sealsync_protocol::{ConflictedRecord, EncryptedRecord, SyncRequest, SyncResponse};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Base URL the fixture answers to.
pub const REMOTE_URL: &str = "https://sync.test";

/// A failure injected for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reply with this HTTP status and an empty body.
    Status(u16),
    /// Reply 429 with an optional `Retry-After`.
    RateLimited(Option<Duration>),
    /// Fail the request with a timeout.
    Timeout,
    /// Drop the connection.
    ConnectionReset,
}

#[derive(Debug, Clone)]
struct Stored {
    record: EncryptedRecord,
    seq: u64,
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<Uuid, Stored>,
    seq: u64,
    last_ts: i64,
    max_page_size: Option<usize>,
    faults: BTreeMap<usize, Fault>,
    reserved: BTreeSet<Uuid>,
    requests: Vec<SyncRequest>,
}

impl RemoteState {
    fn next_stamp(&mut self) -> (u64, i64) {
        self.seq += 1;
        self.last_ts = Utc::now().timestamp_micros().max(self.last_ts + 1);
        (self.seq, self.last_ts)
    }

    fn store(&mut self, mut record: EncryptedRecord) -> EncryptedRecord {
        let (seq, ts) = self.next_stamp();
        record.updated_at_timestamp = ts;
        record.updated_at = format_micros(ts);
        if record.created_at.is_empty() {
            record.created_at = record.updated_at.clone();
            record.created_at_timestamp = ts;
        }
        self.records.insert(
            record.uuid,
            Stored {
                record: record.clone(),
                seq,
            },
        );
        record
    }

    fn handle(&mut self, request: SyncRequest) -> SyncResponse {
        let since = parse_seq(request.sync_token.as_deref());
        let (upto, after) = match request.cursor_token.as_deref().and_then(parse_cursor) {
            Some(cursor) => cursor,
            None => (self.seq, since),
        };

        let mut response = SyncResponse::default();
        for item in request.items {
            if self.reserved.contains(&item.uuid) {
                response.conflicts.push(ConflictedRecord::uuid_conflict(item));
                continue;
            }
            if let Some(existing) = self.records.get(&item.uuid) {
                if existing.record.is_newer_than(&item) {
                    response.conflicts.push(ConflictedRecord::sync_conflict(
                        existing.record.clone(),
                        item,
                    ));
                    continue;
                }
            }
            let stored = self.store(item);
            let mut ack = stored;
            ack.content.clear();
            ack.wrapped_key.clear();
            response.saved_items.push(ack);
        }

        let limit = self
            .max_page_size
            .map_or(request.limit as usize, |max| max.min(request.limit as usize))
            .max(1);
        let mut pending: Vec<&Stored> = self
            .records
            .values()
            .filter(|s| s.seq > after && s.seq <= upto)
            .collect();
        pending.sort_by_key(|s| s.seq);

        let more = pending.len() > limit;
        response.retrieved_items = pending
            .iter()
            .take(limit)
            .map(|s| s.record.clone())
            .collect();
        if more {
            let last = pending[limit - 1].seq;
            response.cursor_token = Some(format!("{upto}:{last}"));
        }
        response.sync_token = Some(self.seq.to_string());
        response
    }
}

fn parse_seq(token: Option<&str>) -> u64 {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}

fn parse_cursor(cursor: &str) -> Option<(u64, u64)> {
    let (upto, after) = cursor.split_once(':')?;
    Some((upto.parse().ok()?, after.parse().ok()?))
}

fn format_micros(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The in-memory sync server.
#[derive(Debug, Default)]
pub struct RemoteFixture {
    state: Mutex<RemoteState>,
}

impl RemoteFixture {
    /// Creates an empty server.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An HTTP transport talking to this server.
    pub fn transport(self: &Arc<Self>) -> HttpTransport<Arc<RemoteFixture>> {
        HttpTransport::new(REMOTE_URL, Arc::clone(self))
    }

    /// Caps the number of records returned per page, regardless of the
    /// requested limit.
    pub fn set_max_page_size(&self, size: usize) {
        self.state.lock().max_page_size = Some(size.max(1));
    }

    /// Fails the `n`th request (1-based, counting every request received).
    pub fn fail_request(&self, n: usize, fault: Fault) {
        self.state.lock().faults.insert(n, fault);
    }

    /// Makes every push of `uuid` a uuid conflict.
    pub fn reserve_uuid(&self, uuid: Uuid) {
        self.state.lock().reserved.insert(uuid);
    }

    /// Stores a record as if another device had pushed it. Returns the
    /// stored copy with the server timestamp.
    pub fn inject(&self, record: EncryptedRecord) -> EncryptedRecord {
        self.state.lock().store(record)
    }

    /// The server's copy of a record.
    pub fn get(&self, uuid: &Uuid) -> Option<EncryptedRecord> {
        self.state.lock().records.get(uuid).map(|s| s.record.clone())
    }

    /// Every stored record, in write order.
    pub fn records(&self) -> Vec<EncryptedRecord> {
        let state = self.state.lock();
        let mut stored: Vec<&Stored> = state.records.values().collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.record.clone()).collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Every request received so far, including failed ones.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.state.lock().requests.clone()
    }

    /// The current sync token.
    pub fn current_token(&self) -> String {
        self.state.lock().seq.to_string()
    }
}

impl HttpClient for RemoteFixture {
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if !request.url.ends_with(SYNC_PATH) {
            return Ok(HttpResponse::status(404));
        }
        let parsed: SyncRequest = match serde_json::from_slice(&request.body) {
            Ok(parsed) => parsed,
            Err(err) => {
                let mut response = HttpResponse::status(400);
                response.body = err.to_string().into_bytes();
                return Ok(response);
            }
        };

        let mut state = self.state.lock();
        state.requests.push(parsed.clone());
        let number = state.requests.len();

        if let Some(fault) = state.faults.remove(&number) {
            return match fault {
                Fault::Status(status) => Ok(HttpResponse::status(status)),
                Fault::RateLimited(retry_after) => {
                    let mut response = HttpResponse::status(429);
                    response.retry_after = retry_after;
                    Ok(response)
                }
                Fault::Timeout => Err(TransportError::Timeout),
                Fault::ConnectionReset => {
                    Err(TransportError::ConnectionClosed("reset by peer".into()))
                }
            };
        }

        let response = state.handle(parsed);
        serde_json::to_vec(&response)
            .map(HttpResponse::ok)
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealsync_engine::{RequestOptions, SyncError, SyncTransport};
    use sealsync_protocol::ContentType;

    fn record() -> EncryptedRecord {
        let mut record = EncryptedRecord::tombstone(Uuid::new_v4(), ContentType::Note);
        record.deleted = false;
        record.content = "004:payload".into();
        record.wrapped_key = "004:key".into();
        record
    }

    fn options() -> RequestOptions {
        RequestOptions {
            timeout: Duration::from_secs(30),
            access_token: None,
        }
    }

    #[test]
    fn push_then_pull_from_another_device() {
        let remote = RemoteFixture::new();
        let transport = remote.transport();

        let pushed = record();
        let response = transport
            .exchange(&SyncRequest::new(vec![pushed.clone()], 10), &options())
            .unwrap();
        assert_eq!(response.saved_items.len(), 1);
        assert!(response.saved_items[0].content.is_empty());
        assert!(response.retrieved_items.is_empty());
        assert_eq!(response.sync_token.as_deref(), Some("1"));

        let response = transport
            .exchange(&SyncRequest::new(vec![], 10), &options())
            .unwrap();
        assert_eq!(response.retrieved_items.len(), 1);
        assert_eq!(response.retrieved_items[0].content, pushed.content);

        let response = transport
            .exchange(
                &SyncRequest::new(vec![], 10).with_sync_token(Some("1".into())),
                &options(),
            )
            .unwrap();
        assert!(response.retrieved_items.is_empty());
    }

    #[test]
    fn pages_follow_cursor() {
        let remote = RemoteFixture::new();
        for _ in 0..5 {
            remote.inject(record());
        }
        let transport = remote.transport();

        let first = transport
            .exchange(&SyncRequest::new(vec![], 2), &options())
            .unwrap();
        assert_eq!(first.retrieved_items.len(), 2);
        let cursor = first.cursor_token.clone().unwrap();

        let second = transport
            .exchange(
                &SyncRequest::new(vec![], 10).with_cursor_token(Some(cursor)),
                &options(),
            )
            .unwrap();
        assert_eq!(second.retrieved_items.len(), 3);
        assert!(second.cursor_token.is_none());
    }

    #[test]
    fn stale_push_conflicts() {
        let remote = RemoteFixture::new();
        let stored = remote.inject(record());
        let mut stale = stored.clone();
        stale.updated_at_timestamp -= 1;

        let response = remote
            .transport()
            .exchange(&SyncRequest::new(vec![stale], 10), &options())
            .unwrap();
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(response.conflicts[0].server_item.as_ref(), Some(&stored));
    }

    #[test]
    fn reserved_uuid_conflicts() {
        let remote = RemoteFixture::new();
        let pushed = record();
        remote.reserve_uuid(pushed.uuid);
        let response = remote
            .transport()
            .exchange(&SyncRequest::new(vec![pushed], 10), &options())
            .unwrap();
        assert_eq!(response.conflicts.len(), 1);
        assert!(remote.is_empty());
    }

    #[test]
    fn faults_fire_once() {
        let remote = RemoteFixture::new();
        remote.fail_request(1, Fault::Status(413));
        let transport = remote.transport();
        assert!(matches!(
            transport.exchange(&SyncRequest::new(vec![], 10), &options()),
            Err(SyncError::PayloadTooLarge)
        ));
        assert!(transport
            .exchange(&SyncRequest::new(vec![], 10), &options())
            .is_ok());
        assert_eq!(remote.requests().len(), 2);
    }
}
