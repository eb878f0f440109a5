//! Single-slot status notifications.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Duration;

/// Severity of a status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

/// An ephemeral status message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub message: String,
    pub kind: NotificationKind,
}

impl NotificationEvent {
    /// Create a success notification.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NotificationKind::Success,
        }
    }

    /// Create an error notification.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NotificationKind::Error,
        }
    }
}

struct Slot {
    current: Option<NotificationEvent>,
    /// Bumped on every emit. An expiry timer carries the generation it
    /// was started for and only clears the slot if it still matches,
    /// so a late timer never clears a newer event.
    generation: u64,
}

struct QueueInner {
    ttl: Duration,
    slot: Mutex<Slot>,
    tx: watch::Sender<Option<NotificationEvent>>,
}

impl QueueInner {
    fn expire(&self, generation: u64) {
        let mut slot = self.slot.lock().expect("lock poisoned");
        if slot.generation == generation && slot.current.is_some() {
            slot.current = None;
            let _ = self.tx.send(None);
        }
    }
}

/// Holds at most one live notification; a new event preempts any
/// still-pending one and restarts the expiry clock.
///
/// `emit` must be called from within a tokio runtime (it spawns the
/// expiry timer).
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<QueueInner>,
}

impl NotificationQueue {
    /// Create a queue whose events expire after `ttl` unless
    /// superseded.
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(QueueInner {
                ttl,
                slot: Mutex::new(Slot {
                    current: None,
                    generation: 0,
                }),
                tx,
            }),
        }
    }

    /// Replaces any pending event and starts its expiry timer.
    pub fn emit(&self, event: NotificationEvent) {
        let generation = {
            let mut slot = self.inner.slot.lock().expect("lock poisoned");
            slot.generation += 1;
            slot.current = Some(event.clone());
            slot.generation
        };
        let _ = self.inner.tx.send(Some(event));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.ttl).await;
            inner.expire(generation);
        });
    }

    /// Returns the live event, if any.
    pub fn current(&self) -> Option<NotificationEvent> {
        self.inner.slot.lock().expect("lock poisoned").current.clone()
    }

    /// Subscribe to notification changes.
    pub fn watch(&self) -> watch::Receiver<Option<NotificationEvent>> {
        self.inner.tx.subscribe()
    }
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}
