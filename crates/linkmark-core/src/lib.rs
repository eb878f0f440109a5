//! Core domain model for the Linkmark client.
//!
//! This crate defines the data shapes shared across the workspace
//! (principals, link records, change-feed events) and the `LinkStore`
//! port the sync engine drives. Store backends implement the port;
//! the engine never sees transport details.

mod error;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use store::{ChangeFeed, LinkStore};
pub use types::{sort_by_recency, ChangeEvent, ChangeKind, LinkRecord, NewLink, Principal};
