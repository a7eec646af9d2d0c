//! # SealSync Protocol
//!
//! Record model, wire messages and export format for SealSync.
//!
//! This crate provides:
//! - `EncryptedRecord` as it travels over the wire and sits in the replica
//! - `DecryptedRecord` and the typed `DomainRecord` sum type
//! - Sync request/response messages and `ConflictedRecord`
//! - `KeyParams` and the `ExportDocument` file format
//!
//! This is a pure protocol crate with no I/O and no cryptography.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod content;
mod content_type;
mod error;
mod export;
mod key_params;
mod messages;
mod record;

pub use content::{
    ComponentContent, Content, DomainRecord, ItemsKeyContent, NoteContent, RecordContent,
    Reference, TagContent, APP_DATA_DOMAIN,
};
pub use content_type::ContentType;
pub use error::{ProtocolError, ProtocolResult};
pub use export::{ExportDocument, EXPORT_VERSION};
pub use key_params::{KeyParams, PROTOCOL_VERSION};
pub use messages::{ConflictKind, ConflictedRecord, SyncRequest, SyncResponse, API_VERSION};
pub use record::{timestamp_now, DecryptedRecord, EncryptedRecord, RecordMeta};
