//! Token-fenced synchronization engine for a link collection.

use crate::error::{EngineError, EngineResult};
use crate::notifications::{NotificationEvent, NotificationQueue};
use linkmark_core::{sort_by_recency, ChangeFeed, LinkRecord, LinkStore, NewLink, Principal};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// How long a status notification stays visible unless superseded.
/// Matches the presentation layer's toast timeout.
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_millis(2500);

const MSG_ADDED: &str = "Bookmark added successfully";
const MSG_ADD_FAILED: &str = "Failed to add bookmark";
const MSG_DELETED: &str = "Bookmark deleted";
const MSG_DELETE_FAILED: &str = "Failed to delete bookmark";
const MSG_LOAD_FAILED: &str = "Failed to load bookmarks";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Table whose change feed drives refreshes.
    pub links_table: String,
    /// Lifetime of a status notification unless superseded.
    pub notification_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            links_table: "bookmarks".to_string(),
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
        }
    }
}

/// The engine's single shared mutable resource. Mutated only inside
/// refresh completion and establish/teardown.
struct SnapshotState {
    records: Vec<LinkRecord>,
    /// Token of the last refresh result that was applied.
    last_applied: u64,
    /// Bumped by establish and teardown. A refresh minted under an
    /// older epoch can no longer apply or emit, even if its query is
    /// still outstanding.
    epoch: u64,
    /// Established principal's id; None outside a session.
    owner: Option<String>,
}

struct EngineShared<S> {
    store: S,
    config: EngineConfig,
    state: Mutex<SnapshotState>,
    refresh_seq: AtomicU64,
    adding: AtomicBool,
    snapshot_tx: watch::Sender<Vec<LinkRecord>>,
    notifications: NotificationQueue,
}

impl<S: LinkStore + 'static> EngineShared<S> {
    /// Mints a refresh token and spawns the query.
    ///
    /// Concurrent calls are permitted and never serialized: a result is
    /// applied only if its token is greater than the last applied one
    /// and its epoch is still current, so completion order does not
    /// matter.
    fn request_refresh(self: &Arc<Self>) {
        let token = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(self);

        tokio::spawn(async move {
            let (owner, epoch) = {
                let state = shared.state.lock().await;
                (state.owner.clone(), state.epoch)
            };
            let Some(owner) = owner else {
                debug!(token, "refresh skipped (not established)");
                return;
            };

            match shared.store.list_links(&owner).await {
                Ok(mut records) => {
                    records.retain(|record| record.user_id == owner);
                    sort_by_recency(&mut records);

                    let mut state = shared.state.lock().await;
                    if state.epoch != epoch {
                        debug!(token, "refresh result discarded (session ended)");
                        return;
                    }
                    if token <= state.last_applied {
                        debug!(
                            token,
                            last_applied = state.last_applied,
                            "refresh result discarded (stale)"
                        );
                        return;
                    }
                    state.last_applied = token;
                    state.records = records.clone();
                    drop(state);

                    let _ = shared.snapshot_tx.send(records);
                    debug!(token, "snapshot applied");
                }
                Err(err) => {
                    let state = shared.state.lock().await;
                    if state.epoch != epoch {
                        debug!(token, "refresh failure discarded (session ended)");
                        return;
                    }
                    drop(state);

                    warn!(token, error = %err, "refresh failed, keeping previous snapshot");
                    shared
                        .notifications
                        .emit(NotificationEvent::error(MSG_LOAD_FAILED));
                }
            }
        });
    }
}

struct Session {
    principal: Principal,
    feed_id: u64,
    listener: JoinHandle<()>,
}

/// Client-side sync engine for one principal's link collection.
///
/// Owns the local snapshot, drives queries and mutations through a
/// `LinkStore`, subscribes to its change feed, and publishes the
/// current snapshot plus status notifications to the presentation
/// layer.
pub struct SyncEngine<S: LinkStore + 'static> {
    shared: Arc<EngineShared<S>>,
    session: Mutex<Option<Session>>,
}

impl<S: LinkStore + 'static> SyncEngine<S> {
    /// Creates an engine with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Creates an engine with the given configuration.
    pub fn with_config(store: S, config: EngineConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        let notifications = NotificationQueue::new(config.notification_ttl);
        Self {
            shared: Arc::new(EngineShared {
                store,
                config,
                state: Mutex::new(SnapshotState {
                    records: Vec::new(),
                    last_applied: 0,
                    epoch: 0,
                    owner: None,
                }),
                refresh_seq: AtomicU64::new(0),
                adding: AtomicBool::new(false),
                snapshot_tx,
                notifications,
            }),
            session: Mutex::new(None),
        }
    }

    /// Establishes the engine for `principal`.
    ///
    /// Opens one change-feed subscription and kicks the initial load,
    /// returning once the subscription is registered (the load runs in
    /// the background). Re-establishing with the same principal is a
    /// no-op; with a different principal the active session is torn
    /// down first. On subscription failure nothing is left acquired.
    pub async fn establish(&self, principal: Principal) -> EngineResult<()> {
        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref() {
            if active.principal.id == principal.id {
                debug!(user_id = %principal.id, "establish is a no-op (already active)");
                return Ok(());
            }
            info!(user_id = %principal.id, "switching principal, tearing down active session");
            teardown_session(&self.shared, &mut session).await;
        }

        let ChangeFeed {
            id: feed_id,
            mut events,
        } = self
            .shared
            .store
            .subscribe(&self.shared.config.links_table)
            .await?;

        {
            let mut state = self.shared.state.lock().await;
            state.epoch += 1;
            state.owner = Some(principal.id.clone());
        }

        let shared = Arc::clone(&self.shared);
        let table = self.shared.config.links_table.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.table == table {
                    debug!(kind = ?event.kind, "change feed event, refreshing");
                    shared.request_refresh();
                }
            }
            debug!("change feed closed");
        });

        info!(user_id = %principal.id, feed_id, "session established");
        *session = Some(Session {
            principal,
            feed_id,
            listener,
        });

        // Initial load; establish does not wait for it.
        self.shared.request_refresh();
        Ok(())
    }

    /// Tears down the active session, if any.
    ///
    /// Closes the subscription and fences out refreshes still in
    /// flight. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let mut session = self.session.lock().await;
        teardown_session(&self.shared, &mut session).await;
    }

    /// Triggers a refresh of the collection snapshot.
    pub fn request_refresh(&self) {
        self.shared.request_refresh();
    }

    /// Inserts a new link owned by the established principal.
    ///
    /// Empty (after trimming) title or url is rejected before any
    /// remote call. At most one add runs at a time; see `is_adding`.
    pub async fn add(&self, title: &str, url: &str) -> EngineResult<()> {
        let title = title.trim();
        let url = url.trim();
        if title.is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        if url.is_empty() {
            return Err(EngineError::Validation("url must not be empty".to_string()));
        }

        let owner = {
            let state = self.shared.state.lock().await;
            state.owner.clone()
        }
        .ok_or(EngineError::NotEstablished)?;

        if self.shared.adding.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AddInFlight);
        }

        let result = self
            .shared
            .store
            .insert_link(NewLink {
                title: title.to_string(),
                url: url.to_string(),
                user_id: owner,
            })
            .await;
        self.shared.adding.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!(title = %title, "link added");
                self.shared.request_refresh();
                self.shared
                    .notifications
                    .emit(NotificationEvent::success(MSG_ADDED));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "add failed");
                self.shared
                    .notifications
                    .emit(NotificationEvent::error(MSG_ADD_FAILED));
                Err(EngineError::Store(err))
            }
        }
    }

    /// Deletes the link with the given id.
    pub async fn remove(&self, id: &str) -> EngineResult<()> {
        {
            let state = self.shared.state.lock().await;
            if state.owner.is_none() {
                return Err(EngineError::NotEstablished);
            }
        }

        match self.shared.store.delete_link(id).await {
            Ok(()) => {
                info!(id = %id, "link removed");
                self.shared.request_refresh();
                self.shared
                    .notifications
                    .emit(NotificationEvent::success(MSG_DELETED));
                Ok(())
            }
            Err(err) => {
                warn!(id = %id, error = %err, "remove failed");
                self.shared
                    .notifications
                    .emit(NotificationEvent::error(MSG_DELETE_FAILED));
                Err(EngineError::Store(err))
            }
        }
    }

    /// Current collection snapshot.
    pub fn snapshot(&self) -> Vec<LinkRecord> {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    pub fn watch_snapshot(&self) -> watch::Receiver<Vec<LinkRecord>> {
        self.shared.snapshot_tx.subscribe()
    }

    /// True while an add is in flight; callers disable duplicate
    /// submission from this.
    pub fn is_adding(&self) -> bool {
        self.shared.adding.load(Ordering::SeqCst)
    }

    /// True when a session is established.
    pub async fn is_established(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Status notifications for the presentation layer.
    pub fn notifications(&self) -> &NotificationQueue {
        &self.shared.notifications
    }
}

async fn teardown_session<S: LinkStore + 'static>(
    shared: &Arc<EngineShared<S>>,
    session: &mut Option<Session>,
) {
    let Some(active) = session.take() else {
        debug!("teardown is a no-op (not established)");
        return;
    };

    // Fence first: anything minted before this point can no longer
    // apply or emit.
    {
        let mut state = shared.state.lock().await;
        state.epoch += 1;
        state.owner = None;
        state.records.clear();
    }
    let _ = shared.snapshot_tx.send(Vec::new());

    active.listener.abort();
    if let Err(err) = shared.store.unsubscribe(active.feed_id).await {
        warn!(error = %err, "change feed unsubscribe failed");
    }
    info!(user_id = %active.principal.id, "session torn down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLinkStore;
    use crate::notifications::NotificationKind;
    use chrono::{TimeZone, Utc};

    fn principal(id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            email: Some(format!("{id}@example.com")),
            display_name: None,
        }
    }

    fn record(id: &str, user_id: &str, secs: i64) -> LinkRecord {
        LinkRecord {
            id: id.to_string(),
            title: format!("link {id}"),
            url: "https://example.com".to_string(),
            user_id: user_id.to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    /// Lets spawned refreshes and timers run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn initial_load_of_empty_store_yields_empty_snapshot() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store);

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        assert!(engine.snapshot().is_empty());
        assert!(engine.is_established().await);
    }

    #[tokio::test(start_paused = true)]
    async fn add_populates_snapshot_and_notifies_success() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        engine
            .add("Docs", "https://example.com/docs")
            .await
            .unwrap();
        settle().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "Docs");
        assert_eq!(snapshot[0].user_id, "user-1");

        let notification = engine.notifications().current().unwrap();
        assert_eq!(notification.kind, NotificationKind::Success);
        assert_eq!(notification.message, "Bookmark added successfully");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_fields_are_rejected_before_any_remote_call() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        let err = engine.add("", "https://x").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = engine.add("Docs", "   ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        settle().await;
        assert_eq!(store.insert_count(), 0);
        assert!(engine.snapshot().is_empty());
        // Field-level feedback is the caller's job; no notification
        // noise for validation.
        assert!(engine.notifications().current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_post_add_and_feed_refreshes_converge() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        // The mock pushes a change event on insert, so this add races
        // its own completion refresh against the feed-triggered one.
        engine
            .add("Docs", "https://example.com/docs")
            .await
            .unwrap();
        settle().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "Docs");
    }

    #[tokio::test(start_paused = true)]
    async fn remove_of_missing_id_fails_without_touching_snapshot() {
        let store = MockLinkStore::new();
        store.push_record(record("a", "user-1", 100)).await;
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;
        assert_eq!(engine.snapshot().len(), 1);

        let err = engine.remove("missing").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(linkmark_core::StoreError::NotFound)
        ));
        settle().await;

        assert_eq!(engine.snapshot().len(), 1);
        let notification = engine.notifications().current().unwrap();
        assert_eq!(notification.kind, NotificationKind::Error);
        assert_eq!(notification.message, "Failed to delete bookmark");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_early_refresh_cannot_overwrite_fast_later_one() {
        let store = MockLinkStore::new();
        store.push_record(record("a", "user-1", 100)).await;
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;
        assert_eq!(engine.snapshot().len(), 1);

        // Earlier refresh: captures [a], completes late.
        store.queue_list_delay(Duration::from_millis(50)).await;
        engine.request_refresh();
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Later refresh: captures [a, b], completes early.
        store.push_record(record("b", "user-1", 200)).await;
        store.queue_list_delay(Duration::from_millis(5)).await;
        engine.request_refresh();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // The late completion of the earlier token must not roll the
        // snapshot back.
        let snapshot = engine.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn establish_twice_keeps_a_single_subscription() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        assert_eq!(store.subscription_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_twice_is_a_noop_the_second_time() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        engine.teardown().await;
        assert_eq!(store.subscription_count().await, 0);
        assert!(!engine.is_established().await);

        engine.teardown().await;
        assert_eq!(store.subscription_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn establish_for_different_principal_swaps_the_session() {
        let store = MockLinkStore::new();
        store.push_record(record("a", "user-1", 100)).await;
        store.push_record(record("b", "user-2", 200)).await;
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;
        assert_eq!(engine.snapshot()[0].id, "a");

        engine.establish(principal("user-2")).await.unwrap();
        settle().await;

        assert_eq!(store.subscription_count().await, 1);
        let snapshot = engine.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_in_flight_at_teardown_is_discarded() {
        let store = MockLinkStore::new();
        store.push_record(record("a", "user-1", 100)).await;
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        store.queue_list_delay(Duration::from_millis(50)).await;
        engine.request_refresh();
        tokio::time::sleep(Duration::from_millis(1)).await;

        engine.teardown().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(engine.snapshot().is_empty());
        assert!(engine.notifications().current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_ordered_newest_first_regardless_of_arrival() {
        let store = MockLinkStore::new();
        store.push_record(record("t3", "user-1", 300)).await;
        store.push_record(record("t1", "user-1", 100)).await;
        store.push_record(record("t2", "user-1", 200)).await;
        let engine = SyncEngine::new(store);

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        let snapshot = engine.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t2", "t1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_records_never_enter_the_snapshot() {
        let store = MockLinkStore::new();
        store.push_record(record("mine", "user-1", 100)).await;
        store.push_record(record("theirs", "user-2", 200)).await;
        let engine = SyncEngine::new(store);

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        let snapshot = engine.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["mine"]);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_flag_blocks_a_second_add_in_flight() {
        let store = MockLinkStore::new();
        store.set_insert_delay(Duration::from_millis(50)).await;
        let engine = Arc::new(SyncEngine::new(store));

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.add("One", "https://example.com/1").await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(engine.is_adding());
        let err = engine.add("Two", "https://example.com/2").await.unwrap_err();
        assert!(matches!(err, EngineError::AddInFlight));

        tokio::time::sleep(Duration::from_millis(100)).await;
        first.await.unwrap().unwrap();
        assert!(!engine.is_adding());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "One");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_keeps_previous_snapshot_and_notifies() {
        let store = MockLinkStore::new();
        store.push_record(record("a", "user-1", 100)).await;
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;
        assert_eq!(engine.snapshot().len(), 1);

        store.fail_next_list();
        engine.request_refresh();
        settle().await;

        assert_eq!(engine.snapshot().len(), 1);
        let notification = engine.notifications().current().unwrap();
        assert_eq!(notification.kind, NotificationKind::Error);
        assert_eq!(notification.message, "Failed to load bookmarks");
    }

    #[tokio::test(start_paused = true)]
    async fn add_failure_emits_error_without_refreshing() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        store.fail_next_insert();
        let err = engine
            .add("Docs", "https://example.com/docs")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        settle().await;

        assert_eq!(store.insert_count(), 0);
        assert!(engine.snapshot().is_empty());
        let notification = engine.notifications().current().unwrap();
        assert_eq!(notification.kind, NotificationKind::Error);
        assert_eq!(notification.message, "Failed to add bookmark");
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_require_an_established_session() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        let err = engine.add("Docs", "https://example.com").await.unwrap_err();
        assert!(matches!(err, EngineError::NotEstablished));

        let err = engine.remove("some-id").await.unwrap_err();
        assert!(matches!(err, EngineError::NotEstablished));

        // A refresh without a session is silently skipped.
        engine.request_refresh();
        settle().await;
        assert!(engine.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn external_change_feed_event_triggers_a_refresh() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;
        assert!(engine.snapshot().is_empty());

        // Another client writes: the record appears without any local
        // mutation, via the feed alone.
        store.push_record(record("remote", "user-1", 100)).await;
        store.emit_change(linkmark_core::ChangeKind::Insert).await;
        settle().await;

        let snapshot = engine.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["remote"]);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_snapshot_sees_replacements() {
        let store = MockLinkStore::new();
        let engine = SyncEngine::new(store.clone());
        let mut rx = engine.watch_snapshot();

        engine.establish(principal("user-1")).await.unwrap();
        settle().await;

        engine
            .add("Docs", "https://example.com/docs")
            .await
            .unwrap();
        settle().await;

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
