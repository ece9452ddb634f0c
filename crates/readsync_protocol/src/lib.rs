//! # readsync protocol
//!
//! Record model, sync configuration and conflict resolution for readsync.
//!
//! This crate provides:
//! - `Record` and `RecordPatch` for the synchronized article entity
//! - `SyncConfiguration` with the user's sync preferences
//! - `SyncConflict` with the tagged `ConflictKind` classification
//! - The conflict resolver (`ConflictStrategy::resolve`)
//! - The `Clock` seam used for every timestamp
//!
//! Apart from `SystemClock` this is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod conflict;
mod error;
mod record;
mod resolver;
mod types;

pub use clock::{Clock, SystemClock};
pub use config::{
    ConflictStrategy, SyncConfiguration, SyncConfigurationPatch, SyncInterval,
    MANUAL_INTERVAL_SENTINEL,
};
pub use conflict::{classify, ConflictKind, SyncConflict};
pub use error::{ProtocolError, ProtocolResult};
pub use record::{Record, RecordId, RecordPatch};
pub use resolver::{resolve, Resolution, ResolutionOutcome, WinnerSide};
pub use types::{NetworkType, SyncPhase};
