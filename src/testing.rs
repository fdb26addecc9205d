//! In-memory fakes for the collaborator traits, shared by unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::automation::{Credential, CredentialProvider};
use crate::error::{GenerationError, RemoteApiError};
use crate::google::{BusinessProfileApi, CreatedPost, Endpoint, LocalPost, LocationRef, Review};
use crate::llm::{ContentGenerator, PromptContext};

/// Fixed user -> token map; tokens never expire.
#[derive(Default)]
pub struct StaticCredentials {
    tokens: BTreeMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, user_id: &str, token: &str) -> Self {
        self.tokens.insert(user_id.to_string(), token.to_string());
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_valid_token(&self, user_id: &str) -> Option<Credential> {
        self.tokens.get(user_id).map(|token| Credential {
            access_token: SecretString::from(token.clone()),
            refresh_token: None,
            expires_at: None,
        })
    }

    async fn known_users(&self) -> Vec<String> {
        self.tokens.keys().cloned().collect()
    }
}

/// Returns a canned text (or error) and records every prompt.
pub struct FakeGenerator {
    reply: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<PromptContext>>,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with `RequestFailed`.
    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<PromptContext> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(context.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .clone()
            .ok_or_else(|| GenerationError::RequestFailed("generator offline".into()))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub token: String,
    pub location: LocationRef,
    pub endpoint: Endpoint,
    pub post: LocalPost,
}

#[derive(Debug, Clone)]
pub struct RecordedReply {
    pub review_id: String,
    pub comment: String,
    pub endpoint: Endpoint,
}

/// Business Profile API double with switchable failures.
#[derive(Default)]
pub struct FakeBusinessApi {
    posts: Mutex<Vec<RecordedPost>>,
    post_attempts: AtomicUsize,
    reviews: Mutex<Vec<Review>>,
    replies: Mutex<Vec<RecordedReply>>,
    failing_endpoints: Mutex<HashSet<Endpoint>>,
    failing_reviews: Mutex<HashSet<String>>,
}

impl FakeBusinessApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call on `endpoint` answers HTTP 500.
    pub fn fail_endpoint(&self, endpoint: Endpoint) {
        self.failing_endpoints.lock().unwrap().insert(endpoint);
    }

    pub fn fail_reply_for(&self, review_id: &str) {
        self.failing_reviews
            .lock()
            .unwrap()
            .insert(review_id.to_string());
    }

    pub fn set_reviews(&self, reviews: Vec<Review>) {
        *self.reviews.lock().unwrap() = reviews;
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().unwrap().clone()
    }

    pub fn post_attempts(&self) -> usize {
        self.post_attempts.load(Ordering::SeqCst)
    }

    pub fn replies(&self) -> Vec<RecordedReply> {
        self.replies.lock().unwrap().clone()
    }

    fn check(&self, endpoint: Endpoint) -> Result<(), RemoteApiError> {
        if self.failing_endpoints.lock().unwrap().contains(&endpoint) {
            return Err(RemoteApiError::Status {
                status: 500,
                body: format!("{endpoint:?} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BusinessProfileApi for FakeBusinessApi {
    async fn create_local_post(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
        post: &LocalPost,
    ) -> Result<CreatedPost, RemoteApiError> {
        self.post_attempts.fetch_add(1, Ordering::SeqCst);
        self.check(endpoint)?;

        let mut posts = self.posts.lock().unwrap();
        posts.push(RecordedPost {
            token: token.expose_secret().to_string(),
            location: location.clone(),
            endpoint,
            post: post.clone(),
        });
        Ok(CreatedPost {
            name: format!(
                "{}/localPosts/{}",
                location.resource_path(endpoint),
                posts.len()
            ),
            search_url: None,
            state: Some("LIVE".into()),
        })
    }

    async fn list_reviews(
        &self,
        _token: &SecretString,
        _location: &LocationRef,
        endpoint: Endpoint,
    ) -> Result<Vec<Review>, RemoteApiError> {
        self.check(endpoint)?;
        Ok(self.reviews.lock().unwrap().clone())
    }

    async fn reply_to_review(
        &self,
        _token: &SecretString,
        _location: &LocationRef,
        endpoint: Endpoint,
        review_id: &str,
        comment: &str,
    ) -> Result<(), RemoteApiError> {
        self.check(endpoint)?;
        if self.failing_reviews.lock().unwrap().contains(review_id) {
            return Err(RemoteApiError::Status {
                status: 400,
                body: "reply rejected".into(),
            });
        }
        self.replies.lock().unwrap().push(RecordedReply {
            review_id: review_id.to_string(),
            comment: comment.to_string(),
            endpoint,
        });
        Ok(())
    }
}
