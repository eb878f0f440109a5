//! Supabase backend for the Linkmark `LinkStore` port.
//!
//! This crate provides:
//! - `SupabaseStoreClient`: PostgREST query/insert/delete on the links
//!   table
//! - `RealtimeClient`: websocket change-feed subscriptions delivering
//!   `ChangeEvent`s for watched tables

mod client;
mod messages;
mod realtime;

pub use client::SupabaseStoreClient;
pub use messages::{channel_topic, RealtimeMessage};
pub use realtime::{realtime_endpoint, RealtimeClient};

pub use linkmark_core::{StoreError, StoreResult};
