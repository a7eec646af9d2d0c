//! Paged exchange with the sync endpoint.
//!
//! One call pushes every outbound record and follows the cursor until the
//! server has nothing more to return. Pages that fail with a too-large,
//! timed-out or reset request are retried with a smaller page starting at
//! the first record the server has not accepted yet. Throttling and other
//! transient failures are retried at the same size after a backoff.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::resilience::{request_timeout, Clock};
use crate::transport::{RequestOptions, SyncTransport};
use sealsync_protocol::{ConflictedRecord, EncryptedRecord, SyncRequest, SyncResponse};
use tracing::{debug, warn};

/// Everything gathered across the pages of one exchange.
///
/// Owned by the caller so that results from pages that succeeded survive a
/// later page failing.
#[derive(Debug, Clone, Default)]
pub struct PageAccumulator {
    /// Records changed remotely.
    pub retrieved: Vec<EncryptedRecord>,
    /// Acknowledged outbound records.
    pub saved: Vec<EncryptedRecord>,
    /// Outbound records refused without conflict.
    pub unsaved: Vec<EncryptedRecord>,
    /// Outbound records that collided with remote state.
    pub conflicts: Vec<ConflictedRecord>,
    /// Latest sync token returned.
    pub sync_token: Option<String>,
    /// Pages exchanged successfully.
    pub pages: u32,
    /// Failed attempts that were retried.
    pub retries: u32,
    /// Times the page size was reduced.
    pub shrinks: u32,
}

impl PageAccumulator {
    fn absorb(&mut self, response: SyncResponse) {
        self.retrieved.extend(response.retrieved_items);
        self.saved.extend(response.saved_items);
        self.unsaved.extend(response.unsaved);
        self.conflicts.extend(response.conflicts);
        if response.sync_token.is_some() {
            self.sync_token = response.sync_token;
        }
        self.pages += 1;
    }
}

/// Drives one paged exchange.
pub struct Paginator<'a, T: SyncTransport + ?Sized> {
    transport: &'a T,
    config: &'a SyncConfig,
    clock: &'a dyn Clock,
}

impl<'a, T: SyncTransport + ?Sized> Paginator<'a, T> {
    /// Creates a paginator.
    pub fn new(transport: &'a T, config: &'a SyncConfig, clock: &'a dyn Clock) -> Self {
        Self {
            transport,
            config,
            clock,
        }
    }

    fn shrink(&self, page_size: usize) -> usize {
        // Truncation is intended: 150 -> 37 -> 9 -> 2 -> 1.
        ((page_size as f64 * self.config.shrink_factor) as usize).max(1)
    }

    /// Pushes `outbound` and pulls every remote page into `acc`.
    ///
    /// # Errors
    ///
    /// Non-retryable failures are returned at once. A page that keeps
    /// failing is abandoned after `max_attempts` with
    /// [`SyncError::RetriesExhausted`]. In both cases `acc` keeps whatever
    /// earlier pages returned.
    pub fn run(
        &self,
        outbound: &[EncryptedRecord],
        sync_token: Option<&str>,
        access_token: Option<&str>,
        acc: &mut PageAccumulator,
    ) -> SyncResult<()> {
        let mut page_size = self.config.page_size.max(1);
        let mut sent = 0usize;
        let mut cursor: Option<String> = None;
        let mut failures = 0u32;
        // Shrinking retries do not count towards the backoff.
        let mut backoffs = 0u32;

        loop {
            let end = (sent + page_size).min(outbound.len());
            let page = &outbound[sent..end];
            let limit = u32::try_from(page_size).unwrap_or(u32::MAX);
            let mut request = SyncRequest::new(page.to_vec(), limit)
                .with_sync_token(sync_token.map(str::to_string))
                .with_cursor_token(cursor.clone());
            request.api_version.clone_from(&self.config.api_version);
            let options = RequestOptions {
                timeout: self
                    .config
                    .timeout_override
                    .unwrap_or_else(|| request_timeout(page.len())),
                access_token: access_token.map(str::to_string),
            };

            match self.transport.exchange(&request, &options) {
                Ok(response) => {
                    let next_cursor = response.cursor_token.clone();
                    debug!(
                        page = acc.pages + 1,
                        pushed = page.len(),
                        retrieved = response.retrieved_items.len(),
                        saved = response.saved_items.len(),
                        conflicts = response.conflicts.len(),
                        more = next_cursor.is_some(),
                        "sync page exchanged"
                    );
                    acc.absorb(response);

                    if page.is_empty() && next_cursor.is_some() && next_cursor == cursor {
                        return Err(SyncError::invariant(
                            "server returned the same cursor without progress",
                        ));
                    }

                    sent = end;
                    failures = 0;
                    backoffs = 0;
                    cursor = next_cursor;
                    if cursor.is_none() && sent >= outbound.len() {
                        return Ok(());
                    }
                }
                Err(err) => {
                    failures += 1;
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if failures >= self.config.max_attempts {
                        warn!(attempts = failures, error = %err, "giving up on sync page");
                        return Err(SyncError::RetriesExhausted {
                            attempts: failures,
                            source: Box::new(err),
                        });
                    }

                    acc.retries += 1;
                    if err.shrinks_page() {
                        let smaller = self.shrink(page_size);
                        debug!(from = page_size, to = smaller, error = %err, "shrinking sync page");
                        if smaller < page_size {
                            acc.shrinks += 1;
                        }
                        page_size = smaller;
                        continue;
                    }

                    backoffs += 1;
                    let backoff = self.config.retry.delay_for_attempt(backoffs);
                    let wait = match &err {
                        SyncError::RateLimited {
                            retry_after: Some(after),
                        } => (*after).min(self.config.retry.max_delay.max(backoff)),
                        _ => backoff,
                    };
                    warn!(attempt = failures, ?wait, error = %err, "retrying sync page");
                    self.clock.sleep(wait);
                }
            }
        }
    }
}
