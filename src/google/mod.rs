//! Google Business Profile API access.
//!
//! The engine talks to the API only through [`BusinessProfileApi`]. Every
//! call names an [`Endpoint`] variant so callers can retry once on the
//! location-scoped path when the account-scoped one fails.

mod client;
mod tokens;

pub use client::GoogleBusinessClient;
pub use tokens::{FileTokenStore, StoredToken};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::automation::CallToAction;
use crate::error::{AutomationError, RemoteApiError};

/// Which URL family a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// `accounts/{account}/locations/{location}/...`
    AccountScoped,
    /// `locations/{location}/...`
    LocationScoped,
}

/// Identifies a location, optionally under a known account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRef {
    pub account_id: Option<String>,
    pub location_id: String,
}

impl LocationRef {
    /// Accepts bare ids as well as `accounts/..` / `locations/..` resource names.
    pub fn new(location_id: &str, account_id: Option<&str>) -> Self {
        Self {
            account_id: account_id
                .map(|a| a.trim().trim_start_matches("accounts/").to_string())
                .filter(|a| !a.is_empty()),
            location_id: bare_location_id(location_id),
        }
    }

    /// Resource path for `endpoint`, without a leading slash.
    pub fn resource_path(&self, endpoint: Endpoint) -> String {
        match endpoint {
            Endpoint::AccountScoped => format!(
                "accounts/{}/locations/{}",
                self.account_id.as_deref().unwrap_or("-"),
                self.location_id
            ),
            Endpoint::LocationScoped => format!("locations/{}", self.location_id),
        }
    }
}

fn bare_location_id(raw: &str) -> String {
    let raw = raw.trim();
    match raw.rfind("locations/") {
        Some(idx) => raw[idx + "locations/".len()..]
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string(),
        None => raw.to_string(),
    }
}

/// Body of a `localPosts.create` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPost {
    pub language_code: String,
    pub summary: String,
    pub topic_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_to_action: Option<CallToAction>,
}

impl LocalPost {
    pub fn standard(summary: String, call_to_action: Option<CallToAction>) -> Self {
        Self {
            language_code: "en".to_string(),
            summary,
            topic_type: "STANDARD".to_string(),
            call_to_action,
        }
    }
}

/// What the API returns for a created post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPost {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReply {
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

/// A review as listed by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub review_id: String,
    #[serde(default)]
    pub reviewer: Reviewer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rating: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_reply: Option<ReviewReply>,
}

impl Review {
    /// `reviewId`, or the last segment of `name` when the id is absent.
    pub fn id(&self) -> &str {
        if !self.review_id.is_empty() {
            return &self.review_id;
        }
        self.name.rsplit('/').next().unwrap_or_default()
    }

    pub fn rating(&self) -> u8 {
        star_rating_value(self.star_rating.as_deref())
    }

    pub fn has_reply(&self) -> bool {
        self.review_reply
            .as_ref()
            .is_some_and(|r| !r.comment.trim().is_empty())
    }
}

/// Map the API's star enum to 1..=5. Unknown or missing values count as 5.
pub fn star_rating_value(raw: Option<&str>) -> u8 {
    match raw.map(|r| r.trim().to_uppercase()).as_deref() {
        Some("ONE") | Some("1") => 1,
        Some("TWO") | Some("2") => 2,
        Some("THREE") | Some("3") => 3,
        Some("FOUR") | Some("4") => 4,
        _ => 5,
    }
}

/// Remote operations the pipelines need.
#[async_trait]
pub trait BusinessProfileApi: Send + Sync {
    async fn create_local_post(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
        post: &LocalPost,
    ) -> Result<CreatedPost, RemoteApiError>;

    async fn list_reviews(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
    ) -> Result<Vec<Review>, RemoteApiError>;

    async fn reply_to_review(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
        review_id: &str,
        comment: &str,
    ) -> Result<(), RemoteApiError>;
}

/// Run `call` on the account-scoped endpoint, then once on the
/// location-scoped endpoint if the first attempt was rejected or never
/// reached the server. Each attempt is bounded by `timeout`.
///
/// A timeout or an unreadable success body is returned as is: the first
/// request may already have taken effect. The error of the last attempt is
/// returned when both fail.
pub async fn with_fallback<T, F, Fut>(
    operation: &'static str,
    timeout: Duration,
    mut call: F,
) -> Result<(T, Endpoint), AutomationError>
where
    F: FnMut(Endpoint) -> Fut,
    Fut: Future<Output = Result<T, RemoteApiError>>,
{
    match bounded(operation, timeout, call(Endpoint::AccountScoped)).await {
        Ok(value) => return Ok((value, Endpoint::AccountScoped)),
        Err(e) if falls_back(&e) => {
            tracing::warn!(operation, error = %e, "Account-scoped endpoint failed, trying location-scoped endpoint");
        }
        Err(e) => return Err(e),
    }

    bounded(operation, timeout, call(Endpoint::LocationScoped))
        .await
        .map(|value| (value, Endpoint::LocationScoped))
}

fn falls_back(error: &AutomationError) -> bool {
    matches!(
        error,
        AutomationError::RemoteApi(RemoteApiError::Status { .. } | RemoteApiError::Transport(_))
    )
}

async fn bounded<T, Fut>(
    operation: &'static str,
    timeout: Duration,
    fut: Fut,
) -> Result<T, AutomationError>
where
    Fut: Future<Output = Result<T, RemoteApiError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(AutomationError::from),
        Err(_) => Err(AutomationError::Timeout { operation, timeout }),
    }
}
