//! The synchronized article record.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Identifier of a record.
///
/// Records created on the device carry a temporary [`RecordId::Local`] id
/// until the remote create response supplies the canonical
/// [`RecordId::Remote`] id. A remote id never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecordId {
    /// Canonical id assigned by the remote side.
    Remote(String),
    /// Temporary id for a record not yet created remotely.
    Local(Uuid),
}

impl RecordId {
    /// Creates a remote id.
    pub fn remote(id: impl Into<String>) -> Self {
        RecordId::Remote(id.into())
    }

    /// Creates a fresh temporary local id.
    pub fn new_local() -> Self {
        RecordId::Local(Uuid::new_v4())
    }

    /// Returns true if the remote side assigned this id.
    pub fn is_remote(&self) -> bool {
        matches!(self, RecordId::Remote(_))
    }

    /// Returns the remote id, if any.
    pub fn as_remote(&self) -> Option<&str> {
        match self {
            RecordId::Remote(id) => Some(id),
            RecordId::Local(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Remote(id) => f.write_str(id),
            RecordId::Local(id) => write!(f, "local:{id}"),
        }
    }
}

/// An article in the reading store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier.
    pub id: RecordId,
    /// Article title.
    pub title: String,
    /// Article body.
    pub content: String,
    /// Short summary.
    pub summary: String,
    /// Source URL.
    pub url: String,
    /// Tags (unordered, deduplicated).
    pub tags: BTreeSet<String>,
    /// Archived flag.
    pub archived: bool,
    /// Favorite flag.
    pub favorite: bool,
    /// Read flag.
    pub read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// Last time this record was confirmed identical to remote.
    pub synced_at: Option<DateTime<Utc>>,
    /// Changed locally since the last successful sync. Never sent remotely.
    #[serde(default)]
    pub dirty: bool,
}

impl Record {
    /// Creates a clean record with the given id.
    pub fn new(
        id: RecordId,
        title: impl Into<String>,
        url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            content: String::new(),
            summary: String::new(),
            url: url.into(),
            tags: BTreeSet::new(),
            archived: false,
            favorite: false,
            read: false,
            created_at: now,
            modified_at: now,
            synced_at: None,
            dirty: false,
        }
    }

    /// Creates a record saved on this device only: temporary id, dirty.
    pub fn new_local(title: impl Into<String>, url: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut record = Self::new(RecordId::new_local(), title, url, now);
        record.dirty = true;
        record
    }

    /// Sets the body.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Adds tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.add_tag(tag);
        }
        self
    }

    /// Sets the archived flag.
    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    /// Sets the favorite flag.
    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    /// Sets the read flag.
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Sets the modification time.
    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = modified_at;
        self
    }

    /// Sets the dirty flag.
    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    /// Adds a tag. Tags are trimmed; blank tags are ignored.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        let tag = tag.trim();
        if !tag.is_empty() {
            self.tags.insert(tag.to_string());
        }
    }

    /// Records a local edit: bumps `modified_at` and marks the record dirty.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modified_at = now;
        self.dirty = true;
    }

    /// Marks the record as confirmed identical to remote.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.dirty = false;
        self.synced_at = Some(at);
    }

    /// Validates the record before it is sent remotely.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.title.trim().is_empty() {
            return Err(ProtocolError::invalid_record(&self.id, "title is empty"));
        }
        if self.url.trim().is_empty() {
            return Err(ProtocolError::invalid_record(&self.id, "url is empty"));
        }
        Ok(())
    }

    /// Compares the user-visible content of two records.
    ///
    /// Ignores the id, timestamps and sync bookkeeping.
    pub fn content_eq(&self, other: &Record) -> bool {
        self.text_eq(other) && self.flags_eq(other) && self.tags == other.tags
    }

    /// Title, body, summary and url are equal.
    pub fn text_eq(&self, other: &Record) -> bool {
        self.title == other.title
            && self.content == other.content
            && self.summary == other.summary
            && self.url == other.url
    }

    /// Archived, favorite and read flags are equal.
    pub fn flags_eq(&self, other: &Record) -> bool {
        self.archived == other.archived && self.favorite == other.favorite && self.read == other.read
    }

    /// Applies a patch in place. `None` fields are left untouched.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(content) = &patch.content {
            self.content.clone_from(content);
        }
        if let Some(summary) = &patch.summary {
            self.summary.clone_from(summary);
        }
        if let Some(url) = &patch.url {
            self.url.clone_from(url);
        }
        if let Some(tags) = &patch.tags {
            self.tags.clone_from(tags);
        }
        if let Some(archived) = patch.archived {
            self.archived = archived;
        }
        if let Some(favorite) = patch.favorite {
            self.favorite = favorite;
        }
        if let Some(read) = patch.read {
            self.read = read;
        }
        if let Some(modified_at) = patch.modified_at {
            self.modified_at = modified_at;
        }
        if let Some(synced_at) = patch.synced_at {
            self.synced_at = Some(synced_at);
        }
        if let Some(dirty) = patch.dirty {
            self.dirty = dirty;
        }
    }

    /// Returns a patched copy.
    pub fn patched(&self, patch: &RecordPatch) -> Record {
        let mut record = self.clone();
        record.apply_patch(patch);
        record
    }
}

/// A partial update of a [`Record`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New title.
    pub title: Option<String>,
    /// New body.
    pub content: Option<String>,
    /// New summary.
    pub summary: Option<String>,
    /// New url.
    pub url: Option<String>,
    /// Replacement tag set.
    pub tags: Option<BTreeSet<String>>,
    /// New archived flag.
    pub archived: Option<bool>,
    /// New favorite flag.
    pub favorite: Option<bool>,
    /// New read flag.
    pub read: Option<bool>,
    /// New modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// New sync time.
    pub synced_at: Option<DateTime<Utc>>,
    /// New dirty flag (local store only).
    pub dirty: Option<bool>,
}

impl RecordPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// A patch that overwrites every field of the target with `record`.
    pub fn from_record(record: &Record) -> Self {
        Self {
            title: Some(record.title.clone()),
            content: Some(record.content.clone()),
            summary: Some(record.summary.clone()),
            url: Some(record.url.clone()),
            tags: Some(record.tags.clone()),
            archived: Some(record.archived),
            favorite: Some(record.favorite),
            read: Some(record.read),
            modified_at: Some(record.modified_at),
            synced_at: record.synced_at,
            dirty: Some(record.dirty),
        }
    }

    /// A patch that only marks a record clean as of `at`.
    pub fn synced(at: DateTime<Utc>) -> Self {
        Self {
            synced_at: Some(at),
            dirty: Some(false),
            ..Self::default()
        }
    }

    /// Strips the local-only fields before a patch is sent remotely.
    pub fn for_remote(mut self) -> Self {
        self.dirty = None;
        self.synced_at = None;
        self
    }

    /// Sets the read flag.
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }

    /// Sets the archived flag.
    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    /// Sets the favorite flag.
    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = Some(favorite);
        self
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Returns true if nothing would change.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
