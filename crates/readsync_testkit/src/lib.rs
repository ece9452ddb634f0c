//! # readsync testkit
//!
//! Test utilities for readsync.
//!
//! This crate provides:
//! - Record fixtures and a fully wired in-memory engine harness
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use readsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn uploads_dirty_records() {
//!     let harness = EngineHarness::new();
//!     harness.seed_dirty(3);
//!     let result = harness.executor.full_sync(false).await;
//!     assert_eq!(result.synced_count, 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
