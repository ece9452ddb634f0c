//! Conflict resolution.
//!
//! Resolution is a pure function of the two snapshots, the strategy and the
//! resolution time. Inputs are never mutated; the winner is always a new
//! record value carrying the local id.

use crate::config::ConflictStrategy;
use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which version a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerSide {
    /// The local version.
    Local,
    /// The remote version.
    Remote,
    /// A field-wise merge of both.
    Merged,
}

/// Outcome record attached to a resolved conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Strategy that produced the resolution.
    pub strategy: ConflictStrategy,
    /// Version that was kept.
    pub winner: WinnerSide,
    /// Resolution time.
    pub resolved_at: DateTime<Utc>,
    /// Content from one side was discarded.
    pub data_loss: bool,
    /// Diagnostic confidence in `[0, 1]`. Not part of the contract.
    pub confidence: f32,
}

/// Result of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// A winner was produced.
    Resolved {
        /// The record to keep.
        winner: Record,
        /// How it was chosen.
        resolution: Resolution,
    },
    /// A person has to decide.
    Unresolved,
}

impl ResolutionOutcome {
    /// Returns the winning record, if resolved.
    pub fn winner(&self) -> Option<&Record> {
        match self {
            ResolutionOutcome::Resolved { winner, .. } => Some(winner),
            ResolutionOutcome::Unresolved => None,
        }
    }

    /// Returns true if a winner was produced.
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionOutcome::Resolved { .. })
    }
}

/// Resolves `local` against `remote` with `strategy`.
pub fn resolve(
    local: &Record,
    remote: &Record,
    strategy: ConflictStrategy,
    now: DateTime<Utc>,
) -> ResolutionOutcome {
    strategy.resolve(local, remote, now)
}

impl ConflictStrategy {
    /// Resolves a conflicting pair according to this strategy.
    ///
    /// Pairs with equal content resolve to the remote version under every
    /// strategy, manual included, since nothing can be lost.
    pub fn resolve(&self, local: &Record, remote: &Record, now: DateTime<Utc>) -> ResolutionOutcome {
        if local.content_eq(remote) {
            let mut winner = take_remote(local, remote);
            winner.mark_synced(now);
            return self.outcome(winner, WinnerSide::Remote, now, false, 1.0);
        }

        match self {
            ConflictStrategy::LastWriteWins => {
                if local.modified_at > remote.modified_at {
                    // The remote side lost; the local edits still need uploading.
                    let winner = local.clone();
                    let confidence = lww_confidence(local, remote);
                    self.outcome(winner, WinnerSide::Local, now, true, confidence)
                } else {
                    let mut winner = take_remote(local, remote);
                    winner.mark_synced(now);
                    let confidence = lww_confidence(local, remote);
                    self.outcome(winner, WinnerSide::Remote, now, true, confidence)
                }
            }
            ConflictStrategy::LocalWins => {
                // Dirty flag retained: resolved for download, pending for upload.
                self.outcome(local.clone(), WinnerSide::Local, now, true, 0.8)
            }
            ConflictStrategy::RemoteWins => {
                let mut winner = take_remote(local, remote);
                winner.mark_synced(now);
                self.outcome(winner, WinnerSide::Remote, now, true, 0.8)
            }
            ConflictStrategy::Merge => {
                let winner = merge(local, remote, now);
                let data_loss = !local.text_eq(remote);
                let confidence = if data_loss { 0.7 } else { 0.95 };
                self.outcome(winner, WinnerSide::Merged, now, data_loss, confidence)
            }
            ConflictStrategy::Manual => ResolutionOutcome::Unresolved,
        }
    }

    fn outcome(
        &self,
        winner: Record,
        side: WinnerSide,
        now: DateTime<Utc>,
        data_loss: bool,
        confidence: f32,
    ) -> ResolutionOutcome {
        ResolutionOutcome::Resolved {
            winner,
            resolution: Resolution {
                strategy: *self,
                winner: side,
                resolved_at: now,
                data_loss,
                confidence,
            },
        }
    }
}

/// Remote content under the local id.
fn take_remote(local: &Record, remote: &Record) -> Record {
    let mut winner = remote.clone();
    winner.id = local.id.clone();
    winner
}

/// Tags unioned, flags OR-ed, scalars from the later side (ties to remote).
fn merge(local: &Record, remote: &Record, now: DateTime<Utc>) -> Record {
    let newer = if local.modified_at > remote.modified_at {
        local
    } else {
        remote
    };

    let mut merged = newer.clone();
    merged.id = local.id.clone();
    merged.tags = local.tags.union(&remote.tags).cloned().collect();
    merged.archived = local.archived || remote.archived;
    merged.favorite = local.favorite || remote.favorite;
    merged.read = local.read || remote.read;
    merged.created_at = local.created_at.min(remote.created_at);
    merged.modified_at = local.modified_at.max(remote.modified_at);
    merged.mark_synced(now);
    merged
}

/// Edits far apart in time are a clearer signal than near-simultaneous ones.
fn lww_confidence(local: &Record, remote: &Record) -> f32 {
    let gap = (local.modified_at - remote.modified_at).num_seconds().abs();
    if gap >= 60 {
        0.9
    } else {
        0.6
    }
}
