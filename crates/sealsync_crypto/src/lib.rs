//! # SealSync Crypto
//!
//! End-to-end encryption for SealSync records.
//!
//! Three key tiers:
//! - the **root key**, derived from the account password with Argon2id and
//!   never stored, wraps items keys
//! - **items keys** wrap a per-record content key
//! - the **content key** is generated for every encryption and seals the
//!   record body
//!
//! All sealing uses AES-256-GCM with a random 96-bit nonce drawn inside
//! [`seal`]. Envelopes are bound to the record identity, its content type
//! and the account key parameters.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod envelope;
mod error;
mod hierarchy;
mod key;
mod root_key;

pub use codec::ItemCodec;
pub use envelope::{open, seal, AuthenticatedData, Envelope, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use hierarchy::{decrypt_wrapping_keys, wrap_items_key, ItemsKey, KeyHierarchy, ResolvedKey};
pub use key::{SymmetricKey, KEY_SIZE};
pub use root_key::{KdfCost, RootKey};
