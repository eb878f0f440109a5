//! Principal resolution against the identity provider.

use crate::error::{AuthError, AuthResult};
use linkmark_core::Principal;
use serde::Deserialize;
use tracing::{debug, info};

/// Resolves and revokes the current authenticated session.
#[derive(Clone)]
pub struct SessionGuard {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    access_token: String,
}

/// User record returned by the provider's current-user endpoint.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl UserResponse {
    fn into_principal(self) -> Principal {
        let display_name = self
            .user_metadata
            .get("full_name")
            .or_else(|| self.user_metadata.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Principal {
            id: self.id,
            email: self.email,
            display_name,
        }
    }
}

impl SessionGuard {
    /// Create a new session guard.
    ///
    /// # Arguments
    /// * `api_url` - The identity provider's API URL
    /// * `anon_key` - The publishable API key
    /// * `access_token` - The session's access token
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into(),
            anon_key: anon_key.into(),
            access_token: access_token.into(),
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    /// Resolves the current principal.
    ///
    /// Returns `AuthError::Unauthenticated` when the session token is
    /// missing, expired, or revoked; the consumer redirects to login in
    /// that case.
    pub async fn resolve(&self) -> AuthResult<Principal> {
        let url = self.auth_url("user");
        debug!(url = %url, "resolving current principal");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AuthError::Unauthenticated);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let user: UserResponse = response.json().await?;
        let principal = user.into_principal();
        info!(user_id = %principal.id, "principal resolved");
        Ok(principal)
    }

    /// Revokes the current session at the provider.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let url = self.auth_url("logout");
        debug!(url = %url, "signing out");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Api {
                status: status.as_u16(),
                message,
            });
        }

        info!("session revoked");
        Ok(())
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_url() {
        let guard = SessionGuard::new("https://test.supabase.co", "anon", "token");
        assert_eq!(guard.auth_url("user"), "https://test.supabase.co/auth/v1/user");
        assert_eq!(
            guard.auth_url("logout"),
            "https://test.supabase.co/auth/v1/logout"
        );
    }

    #[test]
    fn test_user_response_to_principal() {
        let json = r#"{
            "id": "user-123",
            "email": "user@example.com",
            "user_metadata": { "full_name": "Ada Lovelace" }
        }"#;

        let user: UserResponse = serde_json::from_str(json).unwrap();
        let principal = user.into_principal();

        assert_eq!(principal.id, "user-123");
        assert_eq!(principal.email.as_deref(), Some("user@example.com"));
        assert_eq!(principal.display_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let json = r#"{
            "id": "user-123",
            "email": null,
            "user_metadata": { "name": "ada" }
        }"#;

        let user: UserResponse = serde_json::from_str(json).unwrap();
        let principal = user.into_principal();

        assert_eq!(principal.display_name.as_deref(), Some("ada"));
        assert!(principal.email.is_none());
    }

    #[test]
    fn test_missing_metadata_yields_no_display_name() {
        let json = r#"{ "id": "user-123" }"#;

        let user: UserResponse = serde_json::from_str(json).unwrap();
        let principal = user.into_principal();

        assert!(principal.display_name.is_none());
    }
}
