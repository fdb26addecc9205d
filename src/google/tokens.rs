//! File-backed OAuth token store with refresh-token renewal.
//!
//! Tokens live in `tokens.json` keyed by user id. A token that expires
//! within [`REFRESH_MARGIN_SECS`] is renewed through the Google OAuth token
//! endpoint before it is handed out.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::automation::{Credential, CredentialProvider};
use crate::config::GoogleConfig;
use crate::error::CredentialError;
use crate::store::JsonStore;

/// Tokens closer than this to expiry are refreshed first.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Token record as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StoredToken {
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + chrono::Duration::seconds(REFRESH_MARGIN_SECS))
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn to_credential(&self) -> Credential {
        Credential {
            access_token: SecretString::from(self.access_token.clone()),
            refresh_token: self.refresh_token.clone().map(SecretString::from),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Credential provider backed by a JSON file.
pub struct FileTokenStore {
    store: JsonStore<StoredToken>,
    client: Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    /// Serializes refreshes so concurrent jobs do not race the token endpoint.
    refresh_lock: Mutex<()>,
}

impl FileTokenStore {
    pub async fn open(path: impl Into<PathBuf>, config: &GoogleConfig) -> Result<Self, CredentialError> {
        let store = JsonStore::open(path).await?;
        Ok(Self::with_store(store, config))
    }

    pub fn in_memory(config: &GoogleConfig) -> Self {
        Self::with_store(JsonStore::in_memory(), config)
    }

    fn with_store(store: JsonStore<StoredToken>, config: &GoogleConfig) -> Self {
        Self {
            store,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Store or replace a user's token.
    pub async fn save_token(
        &self,
        user_id: &str,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
        expires_in: Option<i64>,
    ) -> Result<(), CredentialError> {
        let now = Utc::now();
        let token = StoredToken {
            access_token: access_token.expose_secret().to_string(),
            refresh_token: refresh_token.map(|t| t.expose_secret().to_string()),
            expires_at: expires_in.map(|secs| now + chrono::Duration::seconds(secs)),
            updated_at: now,
        };
        self.store
            .modify(user_id, move |slot| {
                let previous_refresh = slot.as_ref().and_then(|t| t.refresh_token.clone());
                let mut token = token;
                if token.refresh_token.is_none() {
                    token.refresh_token = previous_refresh;
                }
                *slot = Some(token);
            })
            .await?;
        tracing::info!(user_id, "Stored OAuth token");
        Ok(())
    }

    async fn refresh(&self, user_id: &str, refresh_token: &str) -> Result<StoredToken, CredentialError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(CredentialError::ClientNotConfigured);
        };

        let failed = |reason: String| CredentialError::RefreshFailed {
            user_id: user_id.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status, body)));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid token response: {}", e)))?;

        let now = Utc::now();
        let refreshed = StoredToken {
            access_token: body.access_token,
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: body
                .expires_in
                .map(|secs| now + chrono::Duration::seconds(secs)),
            updated_at: now,
        };

        let persisted = refreshed.clone();
        self.store
            .modify(user_id, move |slot| *slot = Some(persisted))
            .await?;

        tracing::info!(user_id, "Refreshed OAuth token");
        Ok(refreshed)
    }
}

#[async_trait]
impl CredentialProvider for FileTokenStore {
    async fn get_valid_token(&self, user_id: &str) -> Option<Credential> {
        let token = self.store.get(user_id).await?;
        let now = Utc::now();
        if !token.needs_refresh(now) {
            return Some(token.to_credential());
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited.
        let token = self.store.get(user_id).await?;
        if !token.needs_refresh(Utc::now()) {
            return Some(token.to_credential());
        }

        let Some(refresh_token) = token.refresh_token.clone() else {
            tracing::warn!(user_id, "Token is expiring and no refresh token is stored");
            return (!token.is_expired(now)).then(|| token.to_credential());
        };

        match self.refresh(user_id, &refresh_token).await {
            Ok(refreshed) => Some(refreshed.to_credential()),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Token refresh failed");
                (!token.is_expired(Utc::now())).then(|| token.to_credential())
            }
        }
    }

    async fn known_users(&self) -> Vec<String> {
        self.store
            .entries()
            .await
            .into_iter()
            .map(|(user_id, _)| user_id)
            .collect()
    }
}
