//! Shared data shapes for the Linkmark client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The authenticated identity a collection is scoped to.
///
/// Resolved once by the session guard and threaded explicitly into
/// `SyncEngine::establish`; immutable for the session's duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User UUID assigned by the identity provider.
    pub id: String,
    /// User email, when the provider shares it.
    pub email: Option<String>,
    /// Display name from the provider's profile metadata.
    pub display_name: Option<String>,
}

/// A saved link as stored remotely.
///
/// Records are immutable once created; the only lifecycle events are
/// creation and deletion. The client holds read-only cached copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Store-assigned UUID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Owning user's UUID.
    pub user_id: String,
    /// Creation timestamp assigned by the store.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new link. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLink {
    pub title: String,
    pub url: String,
    pub user_id: String,
}

/// Kind of row change delivered by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change-feed notification: some row in `table` changed, from any
/// origin including this client's own writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
}

/// Sorts records newest-first: created_at descending, ties broken by id
/// descending. Every snapshot the engine publishes passes through this
/// so the visible order is deterministic regardless of arrival order.
pub fn sort_by_recency(records: &mut [LinkRecord]) {
    records.sort_by(compare_recency);
}

fn compare_recency(a: &LinkRecord, b: &LinkRecord) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}
