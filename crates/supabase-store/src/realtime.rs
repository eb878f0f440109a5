//! Websocket change-feed client.

use crate::messages::{channel_topic, RealtimeMessage};
use futures_util::{SinkExt, StreamExt};
use linkmark_core::{ChangeEvent, ChangeFeed, StoreError, StoreResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Heartbeat cadence expected by the realtime endpoint.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Outbound frame queue capacity.
const OUTBOUND_CAPACITY: usize = 64;

/// Per-subscription event queue capacity.
const FEED_CAPACITY: usize = 64;

/// Builds the realtime websocket endpoint for a Supabase project URL.
pub fn realtime_endpoint(api_url: &str, anon_key: &str) -> String {
    let ws_base = api_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base.trim_end_matches('/'),
        anon_key
    )
}

struct TableSubscriber {
    table: String,
    sender: mpsc::Sender<ChangeEvent>,
}

struct Connection {
    outbound: mpsc::Sender<Message>,
    joined: HashSet<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Connection {
    async fn send(&self, frame: RealtimeMessage) -> StoreResult<()> {
        let json = frame
            .to_json()
            .map_err(|e| StoreError::Json(e.to_string()))?;
        self.outbound
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| StoreError::Subscription("connection closed".to_string()))
    }

    fn shutdown(self) {
        self.reader.abort();
        self.writer.abort();
        self.heartbeat.abort();
    }
}

struct RealtimeInner {
    ws_url: String,
    subscribers: Mutex<HashMap<u64, TableSubscriber>>,
    conn: Mutex<Option<Connection>>,
    next_feed_id: AtomicU64,
    next_ref: AtomicU64,
}

impl RealtimeInner {
    fn next_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Delivers a change event to every live subscriber of its table,
    /// pruning subscribers whose receiver has been dropped.
    async fn fan_out(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|_, sub| !sub.sender.is_closed());

        for sub in subscribers.values() {
            if sub.table != event.table {
                continue;
            }
            if let Err(err) = sub.sender.try_send(event.clone()) {
                warn!(table = %event.table, error = %err, "change feed subscriber lagging, dropping event");
            }
        }
    }
}

/// Websocket client delivering table change notifications.
///
/// One websocket connection is shared across subscriptions and opened
/// lazily on the first subscribe; it is torn down when the last
/// subscription is released.
pub struct RealtimeClient {
    inner: Arc<RealtimeInner>,
}

impl RealtimeClient {
    /// Create a client for the given project URL and publishable key.
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RealtimeInner {
                ws_url: realtime_endpoint(&api_url.into(), &anon_key.into()),
                subscribers: Mutex::new(HashMap::new()),
                conn: Mutex::new(None),
                next_feed_id: AtomicU64::new(0),
                next_ref: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a change-feed subscription for `table`.
    ///
    /// Connects the websocket if this is the first subscription and
    /// joins the table's channel if not already joined.
    pub async fn subscribe(&self, table: &str) -> StoreResult<ChangeFeed> {
        let mut conn_guard = self.inner.conn.lock().await;
        if conn_guard.is_none() {
            *conn_guard = Some(connect(self.inner.clone()).await?);
        }
        let Some(connection) = conn_guard.as_mut() else {
            return Err(StoreError::Subscription(
                "connection unavailable".to_string(),
            ));
        };

        let topic = channel_topic(table);
        if !connection.joined.contains(&topic) {
            connection
                .send(RealtimeMessage::join(&topic, self.inner.next_ref()))
                .await?;
            connection.joined.insert(topic.clone());
            info!(topic = %topic, "joined change feed channel");
        }

        let feed_id = self.inner.next_feed_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, events) = mpsc::channel(FEED_CAPACITY);
        self.inner.subscribers.lock().await.insert(
            feed_id,
            TableSubscriber {
                table: table.to_string(),
                sender,
            },
        );

        Ok(ChangeFeed {
            id: feed_id,
            events,
        })
    }

    /// Releases a subscription.
    ///
    /// Leaves the table channel when its last subscriber goes away and
    /// closes the websocket when no subscriptions remain. Unknown
    /// handles are a no-op.
    pub async fn unsubscribe(&self, feed_id: u64) -> StoreResult<()> {
        let (removed, still_watched, any_left) = {
            let mut subscribers = self.inner.subscribers.lock().await;
            let removed = subscribers.remove(&feed_id).map(|sub| sub.table);
            let still_watched = removed.as_ref().map(|table| {
                subscribers.values().any(|sub| &sub.table == table)
            });
            (removed, still_watched.unwrap_or(false), !subscribers.is_empty())
        };

        let Some(table) = removed else {
            return Ok(());
        };

        let mut conn_guard = self.inner.conn.lock().await;
        if !still_watched {
            if let Some(connection) = conn_guard.as_mut() {
                let topic = channel_topic(&table);
                if connection.joined.remove(&topic) {
                    // Best effort: the connection may already be gone.
                    let _ = connection
                        .send(RealtimeMessage::leave(&topic, self.inner.next_ref()))
                        .await;
                    info!(topic = %topic, "left change feed channel");
                }
            }
        }
        if !any_left {
            if let Some(connection) = conn_guard.take() {
                connection.shutdown();
                info!("realtime connection closed (no subscribers)");
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient").finish_non_exhaustive()
    }
}

/// Opens the websocket and spawns the writer, heartbeat, and reader
/// tasks.
async fn connect(inner: Arc<RealtimeInner>) -> StoreResult<Connection> {
    info!(url = %inner.ws_url, "connecting realtime websocket");
    let (ws_stream, _) = connect_async(&inner.ws_url)
        .await
        .map_err(|e| StoreError::Subscription(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_sender = outbound.clone();
    let heartbeat_inner = inner.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let frame = RealtimeMessage::heartbeat(heartbeat_inner.next_ref());
            let Ok(json) = frame.to_json() else { continue };
            if heartbeat_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let reader_inner = inner.clone();
    let pong_sender = outbound.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match RealtimeMessage::from_json(&text) {
                    Ok(frame) => {
                        if let Some(event) = frame.change_event() {
                            debug!(table = %event.table, kind = ?event.kind, "change feed event");
                            reader_inner.fan_out(event).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse realtime frame");
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("realtime connection closed by server");
                    break;
                }
                Ok(Message::Ping(data)) => {
                    let _ = pong_sender.send(Message::Pong(data)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "realtime websocket error");
                    break;
                }
            }
        }

        // The connection is gone; drop it so the next subscribe
        // reconnects. Subscribers stay registered and simply stop
        // receiving events.
        *reader_inner.conn.lock().await = None;
    });

    Ok(Connection {
        outbound,
        joined: HashSet::new(),
        reader,
        writer,
        heartbeat,
    })
}
