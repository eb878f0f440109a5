//! # Collection sync engine
//!
//! Client-side synchronization engine for a principal's link
//! collection.
//!
//! This crate provides:
//! - `SyncEngine`: one authoritative local snapshot of the collection,
//!   kept consistent with the remote store under concurrent refresh
//!   triggers
//! - `NotificationQueue`: single-slot, auto-expiring status messages
//! - `MockLinkStore`: in-memory store backend for tests
//!
//! ## Architecture
//!
//! Two independent triggers can start a refresh of the same collection:
//! a local mutation completing, and a change-feed notification arriving
//! (possibly for that very mutation). Refreshes are never serialized;
//! instead each one is fenced with a monotonic token, and a result is
//! applied only if its token is higher than the last applied one. A
//! slow refresh that completes after a faster, later one is discarded
//! rather than rolling the view backward.
//!
//! ## Key Invariants
//!
//! - The visible snapshot is always the latest applied refresh result
//! - At most one change-feed subscription per engine instance;
//!   establish/teardown are idempotent and paired
//! - Refreshes in flight at teardown neither mutate the snapshot nor
//!   emit notifications
//! - The snapshot only ever contains records owned by the established
//!   principal

mod engine;
mod error;
mod mock;
mod notifications;

pub use engine::{EngineConfig, SyncEngine, DEFAULT_NOTIFICATION_TTL};
pub use error::{EngineError, EngineResult};
pub use mock::MockLinkStore;
pub use notifications::{NotificationEvent, NotificationKind, NotificationQueue};
