//! PostgREST client for the links table.

use crate::realtime::RealtimeClient;
use async_trait::async_trait;
use linkmark_core::{ChangeFeed, LinkRecord, LinkStore, NewLink, StoreError, StoreResult};
use tracing::{debug, info};

/// Default table holding the link collection.
const DEFAULT_LINKS_TABLE: &str = "bookmarks";

/// Supabase-backed `LinkStore`.
///
/// Scoped to one authenticated session: constructed with the session's
/// access token, which is sent as the Bearer credential on every call.
/// Row-level security on the store is the authoritative access control;
/// the engine filters by owner on top of it.
pub struct SupabaseStoreClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    access_token: String,
    links_table: String,
    realtime: RealtimeClient,
}

impl SupabaseStoreClient {
    /// Create a new store client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The Supabase publishable API key
    /// * `access_token` - The session's access token
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let api_url = api_url.into();
        let anon_key = anon_key.into();
        Self {
            http_client: reqwest::Client::new(),
            realtime: RealtimeClient::new(api_url.clone(), anon_key.clone()),
            api_url,
            anon_key,
            access_token: access_token.into(),
            links_table: DEFAULT_LINKS_TABLE.to_string(),
        }
    }

    /// Override the links table name.
    pub fn with_links_table(mut self, table: impl Into<String>) -> Self {
        self.links_table = table.into();
        self
    }

    /// Build the REST API URL for a table.
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    /// Build the list query for an owner: all columns, newest first
    /// with id as the deterministic tiebreak.
    fn list_url(&self, owner_id: &str) -> String {
        format!(
            "{}?user_id=eq.{}&select=id,title,url,user_id,created_at&order=created_at.desc,id.desc",
            self.rest_url(&self.links_table),
            owner_id
        )
    }

    fn delete_url(&self, id: &str) -> String {
        format!("{}?id=eq.{}", self.rest_url(&self.links_table), id)
    }

    async fn error_from_response(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        StoreError::Api { status, message }
    }
}

#[async_trait]
impl LinkStore for SupabaseStoreClient {
    async fn list_links(&self, owner_id: &str) -> StoreResult<Vec<LinkRecord>> {
        let url = self.list_url(owner_id);
        debug!(url = %url, "listing links");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let records: Vec<LinkRecord> = response
            .json()
            .await
            .map_err(|e| StoreError::Json(e.to_string()))?;
        debug!(count = records.len(), "listed links");
        Ok(records)
    }

    async fn insert_link(&self, link: NewLink) -> StoreResult<()> {
        let url = self.rest_url(&self.links_table);
        debug!(title = %link.title, "inserting link");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&link)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        info!(title = %link.title, "link inserted");
        Ok(())
    }

    async fn delete_link(&self, id: &str) -> StoreResult<()> {
        let url = self.delete_url(id);
        debug!(id = %id, "deleting link");

        // return=representation so a delete that matched nothing can be
        // told apart from a successful one.
        let response = self
            .http_client
            .delete(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let deleted: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Json(e.to_string()))?;
        if deleted.is_empty() {
            return Err(StoreError::NotFound);
        }

        info!(id = %id, "link deleted");
        Ok(())
    }

    async fn subscribe(&self, table: &str) -> StoreResult<ChangeFeed> {
        self.realtime.subscribe(table).await
    }

    async fn unsubscribe(&self, feed_id: u64) -> StoreResult<()> {
        self.realtime.unsubscribe(feed_id).await
    }
}

impl std::fmt::Debug for SupabaseStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStoreClient")
            .field("api_url", &self.api_url)
            .field("links_table", &self.links_table)
            .finish_non_exhaustive()
    }
}
