//! Conflict detection.

use crate::record::{Record, RecordId};
use crate::resolver::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What diverged between the local and remote versions of a record.
///
/// Each variant carries exactly the snapshots it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Title, body, summary or url changed on both sides.
    ContentChanged {
        /// Local snapshot.
        local: Record,
        /// Remote snapshot.
        remote: Record,
    },
    /// Only the archived/favorite/read flags diverged.
    StatusDiverged {
        /// Local snapshot.
        local: Record,
        /// Remote snapshot.
        remote: Record,
    },
    /// Only tags diverged.
    MetadataDiverged {
        /// Local snapshot.
        local: Record,
        /// Remote snapshot.
        remote: Record,
    },
    /// Deleted remotely while modified locally.
    RemoteDeleted {
        /// Local snapshot.
        local: Record,
    },
}

impl ConflictKind {
    /// Short label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            ConflictKind::ContentChanged { .. } => "content_changed",
            ConflictKind::StatusDiverged { .. } => "status_diverged",
            ConflictKind::MetadataDiverged { .. } => "metadata_diverged",
            ConflictKind::RemoteDeleted { .. } => "remote_deleted",
        }
    }

    /// The local snapshot.
    pub fn local(&self) -> &Record {
        match self {
            ConflictKind::ContentChanged { local, .. }
            | ConflictKind::StatusDiverged { local, .. }
            | ConflictKind::MetadataDiverged { local, .. }
            | ConflictKind::RemoteDeleted { local } => local,
        }
    }

    /// The remote snapshot, `None` when the remote record was deleted.
    pub fn remote(&self) -> Option<&Record> {
        match self {
            ConflictKind::ContentChanged { remote, .. }
            | ConflictKind::StatusDiverged { remote, .. }
            | ConflictKind::MetadataDiverged { remote, .. } => Some(remote),
            ConflictKind::RemoteDeleted { .. } => None,
        }
    }
}

/// Classifies a pair of versions of the same record.
///
/// Returns `None` when the two versions carry the same content.
pub fn classify(local: &Record, remote: &Record) -> Option<ConflictKind> {
    let (local, remote) = (local.clone(), remote.clone());
    if !local.text_eq(&remote) {
        Some(ConflictKind::ContentChanged { local, remote })
    } else if !local.flags_eq(&remote) {
        Some(ConflictKind::StatusDiverged { local, remote })
    } else if local.tags != remote.tags {
        Some(ConflictKind::MetadataDiverged { local, remote })
    } else {
        None
    }
}

/// A record changed independently on both sides since the last checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict identifier.
    pub id: Uuid,
    /// The record in conflict.
    pub record_id: RecordId,
    /// What diverged, with snapshots.
    pub kind: ConflictKind,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// How it was resolved.
    pub resolution: Option<Resolution>,
}

impl SyncConflict {
    /// Creates an unresolved conflict.
    pub fn new(kind: ConflictKind, detected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id: kind.local().id.clone(),
            kind,
            detected_at,
            resolved_at: None,
            resolution: None,
        }
    }

    /// Attaches the resolution. The snapshots are never touched.
    pub fn resolve(&mut self, resolution: Resolution) {
        self.resolved_at = Some(resolution.resolved_at);
        self.resolution = Some(resolution);
    }

    /// Returns true if the conflict has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}
