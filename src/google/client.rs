//! reqwest client for the Business Profile v4 REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::GoogleConfig;
use crate::error::RemoteApiError;
use crate::google::{BusinessProfileApi, CreatedPost, Endpoint, LocalPost, LocationRef, Review};

/// Upper bound on review pages fetched per listing.
const MAX_REVIEW_PAGES: usize = 10;
const REVIEW_PAGE_SIZE: u32 = 50;

pub struct GoogleBusinessClient {
    client: Client,
    base_url: String,
}

impl GoogleBusinessClient {
    pub fn new(config: &GoogleConfig) -> Self {
        Self::with_base_url(&config.api_base_url)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(
        &self,
        method: Method,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
        suffix: &str,
    ) -> RequestBuilder {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            location.resource_path(endpoint),
            suffix
        );
        tracing::debug!(%method, %url, "Business Profile request");
        self.client
            .request(method, url)
            .bearer_auth(token.expose_secret())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if status.is_success() {
                RemoteApiError::Decode(e.to_string())
            } else {
                RemoteApiError::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(RemoteApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| RemoteApiError::Decode(e.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListReviewsResponse {
    #[serde(default)]
    reviews: Vec<Review>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
impl BusinessProfileApi for GoogleBusinessClient {
    async fn create_local_post(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
        post: &LocalPost,
    ) -> Result<CreatedPost, RemoteApiError> {
        let request = self
            .request(Method::POST, token, location, endpoint, "localPosts")
            .json(post);
        match self.send(request).await {
            Err(RemoteApiError::Decode(e)) => {
                tracing::warn!(
                    location_id = %location.location_id,
                    error = %e,
                    "Post accepted but the response could not be read"
                );
                Ok(CreatedPost::default())
            }
            other => other,
        }
    }

    async fn list_reviews(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
    ) -> Result<Vec<Review>, RemoteApiError> {
        let mut reviews = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_REVIEW_PAGES {
            let mut request = self
                .request(Method::GET, token, location, endpoint, "reviews")
                .query(&[("pageSize", REVIEW_PAGE_SIZE.to_string())]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let page: ListReviewsResponse = self.send(request).await?;
            reviews.extend(page.reviews);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(reviews),
            }
        }

        tracing::warn!(
            location_id = %location.location_id,
            fetched = reviews.len(),
            "Review listing truncated after {} pages",
            MAX_REVIEW_PAGES
        );
        Ok(reviews)
    }

    async fn reply_to_review(
        &self,
        token: &SecretString,
        location: &LocationRef,
        endpoint: Endpoint,
        review_id: &str,
        comment: &str,
    ) -> Result<(), RemoteApiError> {
        let suffix = format!("reviews/{}/reply", urlencoding::encode(review_id));
        let request = self
            .request(Method::PUT, token, location, endpoint, &suffix)
            .json(&serde_json::json!({ "comment": comment }));
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    fn token() -> SecretString {
        SecretString::from("ya29.test")
    }

    #[tokio::test]
    async fn test_create_post_on_account_scoped_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/accounts/42/locations/123/localPosts")
            .match_header("authorization", "Bearer ya29.test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "summary": "Hello",
                "topicType": "STANDARD",
                "callToAction": {"actionType": "ORDER", "url": "https://acme.example"}
            })))
            .with_status(200)
            .with_body(r#"{"name":"accounts/42/locations/123/localPosts/p1","searchUrl":"https://g.co/p1","state":"LIVE"}"#)
            .create_async()
            .await;

        let client = GoogleBusinessClient::with_base_url(&server.url());
        let post = LocalPost::standard(
            "Hello".into(),
            Some(crate::automation::CallToAction {
                action_type: crate::automation::ActionType::Order,
                url: Some("https://acme.example".into()),
            }),
        );
        let created = client
            .create_local_post(
                &token(),
                &LocationRef::new("123", Some("42")),
                Endpoint::AccountScoped,
                &post,
            )
            .await
            .unwrap();

        assert_eq!(created.name, "accounts/42/locations/123/localPosts/p1");
        assert_eq!(created.search_url.as_deref(), Some("https://g.co/p1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_accepted_post_with_unreadable_body_is_not_reposted() {
        let mut server = mockito::Server::new_async().await;
        let primary = server
            .mock("POST", "/accounts/-/locations/9/localPosts")
            .with_status(200)
            .with_body("<html>ok</html>")
            .expect(1)
            .create_async()
            .await;
        let fallback = server
            .mock("POST", "/locations/9/localPosts")
            .with_status(200)
            .with_body(r#"{"name":"locations/9/localPosts/dup"}"#)
            .expect(0)
            .create_async()
            .await;

        let client = GoogleBusinessClient::with_base_url(&server.url());
        let token = token();
        let location = LocationRef::new("9", None);
        let post = LocalPost::standard("Hello".into(), None);
        let (created, endpoint) =
            crate::google::with_fallback("create local post", Duration::from_secs(5), |endpoint| {
                client.create_local_post(&token, &location, endpoint, &post)
            })
            .await
            .unwrap();

        assert_eq!(endpoint, Endpoint::AccountScoped);
        assert!(created.name.is_empty());
        primary.assert_async().await;
        fallback.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/locations/123/localPosts")
            .with_status(403)
            .with_body("PERMISSION_DENIED")
            .create_async()
            .await;

        let client = GoogleBusinessClient::with_base_url(&server.url());
        let err = client
            .create_local_post(
                &token(),
                &LocationRef::new("123", None),
                Endpoint::LocationScoped,
                &LocalPost::standard("Hello".into(), None),
            )
            .await
            .unwrap_err();

        match err {
            RemoteApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "PERMISSION_DENIED");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_reviews_follows_page_tokens() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/accounts/-/locations/9/reviews")
            .match_query(Matcher::Regex("^pageSize=50$".into()))
            .with_status(200)
            .with_body(r#"{"reviews":[{"reviewId":"r1","starRating":"FIVE"}],"nextPageToken":"p2"}"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/accounts/-/locations/9/reviews")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_status(200)
            .with_body(r#"{"reviews":[{"reviewId":"r2","starRating":"ONE"}]}"#)
            .create_async()
            .await;

        let client = GoogleBusinessClient::with_base_url(&server.url());
        let reviews = client
            .list_reviews(&token(), &LocationRef::new("9", None), Endpoint::AccountScoped)
            .await
            .unwrap();

        let ids: Vec<&str> = reviews.iter().map(Review::id).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_reply_uses_put() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/locations/9/reviews/r1/reply")
            .match_body(Matcher::Json(serde_json::json!({ "comment": "Thank you!" })))
            .with_status(200)
            .with_body(r#"{"comment":"Thank you!"}"#)
            .create_async()
            .await;

        let client = GoogleBusinessClient::with_base_url(&server.url());
        client
            .reply_to_review(
                &token(),
                &LocationRef::new("9", None),
                Endpoint::LocationScoped,
                "r1",
                "Thank you!",
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
