//! The sync engine's port to the remote store.

use crate::error::StoreResult;
use crate::types::{ChangeEvent, LinkRecord, NewLink};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An open change-feed subscription.
///
/// `events` delivers one `ChangeEvent` per row change in the watched
/// table, regardless of origin. Dropping the receiver does not release
/// store-side resources; callers pass `id` to `LinkStore::unsubscribe`
/// for that.
#[derive(Debug)]
pub struct ChangeFeed {
    /// Backend-assigned subscription handle.
    pub id: u64,
    /// Change notifications for the watched table.
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// The remote store as the engine sees it.
///
/// All remote operations are individually atomic single-row operations;
/// the engine's only consistency job is token-ordered snapshot
/// replacement on top of them.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Fetches all links owned by `owner_id`, ordered newest-first
    /// (created_at descending, id descending).
    async fn list_links(&self, owner_id: &str) -> StoreResult<Vec<LinkRecord>>;

    /// Inserts a new link. The store assigns id and created_at.
    async fn insert_link(&self, link: NewLink) -> StoreResult<()>;

    /// Deletes the link with the given id. Ownership is enforced by the
    /// store; a missing row is `StoreError::NotFound`.
    async fn delete_link(&self, id: &str) -> StoreResult<()>;

    /// Opens a change-feed subscription for `table`.
    async fn subscribe(&self, table: &str) -> StoreResult<ChangeFeed>;

    /// Releases the subscription with the given handle. Releasing an
    /// unknown handle is a no-op.
    async fn unsubscribe(&self, feed_id: u64) -> StoreResult<()>;
}
