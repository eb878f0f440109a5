//! In-memory `LinkStore` for tests.

use async_trait::async_trait;
use chrono::Utc;
use linkmark_core::{
    ChangeEvent, ChangeFeed, ChangeKind, LinkRecord, LinkStore, NewLink, StoreError, StoreResult,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

const FEED_CAPACITY: usize = 16;

struct MockInner {
    records: Mutex<Vec<LinkRecord>>,
    /// One entry per upcoming list call; popped in order. Lets tests
    /// simulate out-of-order refresh completion.
    list_delays: Mutex<VecDeque<Duration>>,
    insert_delay: Mutex<Option<Duration>>,
    fail_next_list: AtomicBool,
    fail_next_insert: AtomicBool,
    subscriptions: Mutex<HashMap<u64, (String, mpsc::Sender<ChangeEvent>)>>,
    next_feed_id: AtomicU64,
    next_record: AtomicU64,
    insert_count: AtomicU64,
}

/// An in-memory store backend with injectable delays and failures.
///
/// Clones share state, so a test can keep a handle for assertions
/// after moving one into the engine. Successful inserts and deletes
/// push a change event to every open subscription, like the real feed.
#[derive(Clone)]
pub struct MockLinkStore {
    inner: Arc<MockInner>,
}

impl MockLinkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                records: Mutex::new(Vec::new()),
                list_delays: Mutex::new(VecDeque::new()),
                insert_delay: Mutex::new(None),
                fail_next_list: AtomicBool::new(false),
                fail_next_insert: AtomicBool::new(false),
                subscriptions: Mutex::new(HashMap::new()),
                next_feed_id: AtomicU64::new(0),
                next_record: AtomicU64::new(0),
                insert_count: AtomicU64::new(0),
            }),
        }
    }

    /// Seeds a record directly, without a change event.
    pub async fn push_record(&self, record: LinkRecord) {
        self.inner.records.lock().await.push(record);
    }

    /// Queues a delay for the next list call(s), popped in order.
    pub async fn queue_list_delay(&self, delay: Duration) {
        self.inner.list_delays.lock().await.push_back(delay);
    }

    /// Makes every insert take `delay` before completing.
    pub async fn set_insert_delay(&self, delay: Duration) {
        *self.inner.insert_delay.lock().await = Some(delay);
    }

    /// Fails the next list call with a transport error.
    pub fn fail_next_list(&self) {
        self.inner.fail_next_list.store(true, Ordering::SeqCst);
    }

    /// Fails the next insert with an API error.
    pub fn fail_next_insert(&self) {
        self.inner.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Number of currently open subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().await.len()
    }

    /// Total successful inserts.
    pub fn insert_count(&self) -> u64 {
        self.inner.insert_count.load(Ordering::SeqCst)
    }

    /// Current store contents.
    pub async fn records(&self) -> Vec<LinkRecord> {
        self.inner.records.lock().await.clone()
    }

    /// Pushes a change event to every open subscription, as if another
    /// client had written.
    pub async fn emit_change(&self, kind: ChangeKind) {
        self.inner.broadcast(kind).await;
    }
}

impl Default for MockLinkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInner {
    async fn broadcast(&self, kind: ChangeKind) {
        let subscriptions = self.subscriptions.lock().await;
        for (table, sender) in subscriptions.values() {
            let _ = sender.try_send(ChangeEvent {
                table: table.clone(),
                kind,
            });
        }
    }
}

#[async_trait]
impl LinkStore for MockLinkStore {
    async fn list_links(&self, owner_id: &str) -> StoreResult<Vec<LinkRecord>> {
        if self.inner.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Transport("simulated list failure".to_string()));
        }

        // Capture before sleeping: a slow query returns the data that
        // was current when it started, which is what makes reordering
        // tests meaningful.
        let snapshot: Vec<LinkRecord> = self
            .inner
            .records
            .lock()
            .await
            .iter()
            .filter(|record| record.user_id == owner_id)
            .cloned()
            .collect();

        let delay = self.inner.list_delays.lock().await.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(snapshot)
    }

    async fn insert_link(&self, link: NewLink) -> StoreResult<()> {
        let delay = *self.inner.insert_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Api {
                status: 400,
                message: "simulated insert failure".to_string(),
            });
        }

        let n = self.inner.next_record.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.records.lock().await.push(LinkRecord {
            id: format!("link-{n}"),
            title: link.title,
            url: link.url,
            user_id: link.user_id,
            created_at: Utc::now(),
        });
        self.inner.insert_count.fetch_add(1, Ordering::SeqCst);

        self.inner.broadcast(ChangeKind::Insert).await;
        Ok(())
    }

    async fn delete_link(&self, id: &str) -> StoreResult<()> {
        {
            let mut records = self.inner.records.lock().await;
            let before = records.len();
            records.retain(|record| record.id != id);
            if records.len() == before {
                return Err(StoreError::NotFound);
            }
        }

        self.inner.broadcast(ChangeKind::Delete).await;
        Ok(())
    }

    async fn subscribe(&self, table: &str) -> StoreResult<ChangeFeed> {
        let id = self.inner.next_feed_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, events) = mpsc::channel(FEED_CAPACITY);
        self.inner
            .subscriptions
            .lock()
            .await
            .insert(id, (table.to_string(), sender));
        Ok(ChangeFeed { id, events })
    }

    async fn unsubscribe(&self, feed_id: u64) -> StoreResult<()> {
        self.inner.subscriptions.lock().await.remove(&feed_id);
        Ok(())
    }
}
