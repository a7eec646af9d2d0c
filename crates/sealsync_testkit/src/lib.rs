//! # SealSync Testkit
//!
//! Test utilities for SealSync.
//!
//! This crate provides:
//! - A cooperative in-memory sync server with fault injection
//! - Account, session and engine fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sealsync_testkit::prelude::*;
//!
//! #[test]
//! fn two_devices() {
//!     let remote = RemoteFixture::new();
//!     let account = TestAccount::new("a@example.com");
//!     let (engine, _clock) = engine(&remote);
//!     let (mut session, key) = account.registered_session();
//!     engine.sync(&mut session, vec![key]).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;
