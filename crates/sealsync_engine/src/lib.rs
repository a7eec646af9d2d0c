//! # SealSync Engine
//!
//! Client-side sync engine for end-to-end encrypted records.
//!
//! This crate provides:
//! - Paged push/pull against a single sync endpoint, with page shrinking
//!   and exponential backoff
//! - Conflict resolution by timestamp, with forking and reference remapping
//! - Key reconciliation and missing-key quarantine
//! - Pacing and single-flight serialization of syncs
//! - HTTP transport abstraction and a replica store contract
//!
//! ## Architecture
//!
//! One sync is one or two **rounds**:
//! 1. Push pending records and pull remote changes, page by page
//! 2. Load any items keys that arrived
//! 3. Resolve conflicts and push the resolved records once more
//!
//! A second round that still reports conflicts is a fatal error.
//!
//! ## Key Invariants
//!
//! - The server never sees plaintext
//! - Results of completed pages are never lost to a later failure
//! - No record is decoded partially: one failure aborts the batch
//! - Syncs never overlap

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod pagination;
mod resilience;
mod session;
mod store;
mod transport;

pub use config::{env, EnvOverrides, RetryConfig, SyncConfig};
pub use conflict::{ConflictResolver, Resolution};
pub use engine::{CycleStats, SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use pagination::{PageAccumulator, Paginator};
pub use resilience::{request_timeout, Clock, ManualClock, SyncGate, SyncPermit, SystemClock};
pub use session::Session;
pub use store::{MemoryReplicaStore, ReplicaStore, StoreError, StoreResult};
pub use transport::{
    classify_status, HttpClient, HttpRequest, HttpResponse, HttpTransport, MockTransport,
    RequestOptions, SyncTransport, TransportError, SYNC_PATH,
};
