//! Review monitoring and reply-once pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use crate::automation::activity::{ActivityLog, ActivityType, failure_details};
use crate::automation::credentials::{ResolvedCredential, TokenResolver, TokenSource};
use crate::automation::locks::LocationLocks;
use crate::automation::types::AutoReplyConfig;
use crate::error::{AutomationError, Result};
use crate::google::{BusinessProfileApi, LocationRef, Review, with_fallback};
use crate::llm::{ContentGenerator, ContentPurpose, PromptContext, ReplyTone};
use crate::store::RepliedReviewStore;

/// Counters for one review check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub total_reviews: usize,
    pub unreplied: usize,
    pub replied: usize,
    pub failed: usize,
    /// Unreplied reviews filtered out by the tone preferences.
    pub skipped: usize,
}

/// Whether `config` wants a reply for `review`.
///
/// `replyToAll` bypasses the per-tone switches.
pub fn should_reply_to_review(review: &Review, config: &AutoReplyConfig) -> bool {
    if config.reply_to_all {
        return true;
    }
    match ReplyTone::from_rating(review.rating()) {
        ReplyTone::Positive => config.reply_to_positive,
        ReplyTone::Neutral => config.reply_to_neutral,
        ReplyTone::Negative => config.reply_to_negative,
    }
}

pub struct ReviewReplyPipeline {
    resolver: TokenResolver,
    generator: Arc<dyn ContentGenerator>,
    api: Arc<dyn BusinessProfileApi>,
    replied: Arc<dyn RepliedReviewStore>,
    activity: Arc<ActivityLog>,
    timeout: Duration,
    reply_delay: Duration,
    runs: LocationLocks,
}

impl ReviewReplyPipeline {
    pub fn new(
        resolver: TokenResolver,
        generator: Arc<dyn ContentGenerator>,
        api: Arc<dyn BusinessProfileApi>,
        replied: Arc<dyn RepliedReviewStore>,
        activity: Arc<ActivityLog>,
        timeout: Duration,
        reply_delay: Duration,
    ) -> Self {
        Self {
            resolver,
            generator,
            api,
            replied,
            activity,
            timeout,
            reply_delay,
            runs: LocationLocks::new(),
        }
    }

    /// Check one location and reply to every eligible, unreplied review.
    ///
    /// A failure before the reply loop records `review_check_failed` and is
    /// returned. Failures of individual replies are recorded and counted.
    /// Runs for the same location are serialized, so a review seen by two
    /// overlapping checks is answered once.
    pub async fn run(&self, location_id: &str, config: &AutoReplyConfig) -> Result<CheckResult> {
        let _guard = self.runs.acquire(location_id).await;

        let (credential, reviews) = match self.fetch(location_id, config).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!(location_id, error = %e, "Review check failed");
                let mut details = failure_details(&e);
                details.insert("businessName".into(), Value::from(config.business_name.clone()));
                self.activity
                    .record(location_id, ActivityType::ReviewCheckFailed, Value::Object(details))
                    .await;
                return Err(e);
            }
        };

        let already_replied = match self.replied.replied_ids(location_id).await {
            Ok(ids) => ids,
            Err(e) => {
                let e = AutomationError::from(e);
                self.activity
                    .record(
                        location_id,
                        ActivityType::ReviewCheckFailed,
                        Value::Object(failure_details(&e)),
                    )
                    .await;
                return Err(e);
            }
        };

        let mut result = CheckResult {
            total_reviews: reviews.len(),
            ..CheckResult::default()
        };

        let unreplied: Vec<&Review> = reviews
            .iter()
            .filter(|r| !r.has_reply() && !already_replied.contains(r.id()))
            .collect();
        result.unreplied = unreplied.len();

        let eligible: Vec<&Review> = unreplied
            .into_iter()
            .filter(|r| should_reply_to_review(r, config))
            .collect();
        result.skipped = result.unreplied - eligible.len();

        let location = LocationRef::new(location_id, config.account_id.as_deref());
        for (index, review) in eligible.into_iter().enumerate() {
            if index > 0 && !self.reply_delay.is_zero() {
                tokio::time::sleep(self.reply_delay).await;
            }

            match self.reply(&credential, &location, config, review).await {
                Ok(reply) => {
                    result.replied += 1;
                    if let Err(e) = self.replied.mark_replied(location_id, review.id()).await {
                        tracing::warn!(
                            location_id,
                            review_id = review.id(),
                            error = %e,
                            "Reply posted but replied marker could not be saved"
                        );
                    }
                    self.activity
                        .record(
                            location_id,
                            ActivityType::ReviewReplied,
                            json!({
                                "reviewId": review.id(),
                                "reviewer": review.reviewer.display_name,
                                "rating": review.rating(),
                                "reply": reply,
                            }),
                        )
                        .await;
                }
                Err(e) => {
                    result.failed += 1;
                    tracing::warn!(location_id, review_id = review.id(), error = %e, "Review reply failed");
                    let mut details = failure_details(&e);
                    details.insert("reviewId".into(), Value::from(review.id()));
                    details.insert("rating".into(), Value::from(review.rating()));
                    self.activity
                        .record(location_id, ActivityType::ReviewReplyFailed, Value::Object(details))
                        .await;
                }
            }
        }

        tracing::info!(
            location_id,
            total = result.total_reviews,
            unreplied = result.unreplied,
            replied = result.replied,
            failed = result.failed,
            skipped = result.skipped,
            "Review check complete"
        );
        Ok(result)
    }

    async fn fetch(
        &self,
        location_id: &str,
        config: &AutoReplyConfig,
    ) -> Result<(ResolvedCredential, Vec<Review>)> {
        let credential = self
            .resolver
            .resolve(&config.user_id, &TokenSource::Provider)
            .await?;

        let location = LocationRef::new(location_id, config.account_id.as_deref());
        let token = &credential.token;
        let location_ref = &location;
        let api = self.api.as_ref();
        let (reviews, _) = with_fallback("list reviews", self.timeout, |endpoint| {
            api.list_reviews(token, location_ref, endpoint)
        })
        .await?;

        Ok((credential, reviews))
    }

    async fn reply(
        &self,
        credential: &ResolvedCredential,
        location: &LocationRef,
        config: &AutoReplyConfig,
        review: &Review,
    ) -> Result<String> {
        let rating = review.rating();
        let context = PromptContext {
            business_name: config.business_name.clone(),
            category: config.category.clone(),
            keywords: config.keyword_list(),
            location: None,
            website_url: None,
            purpose: ContentPurpose::ReviewReply {
                reviewer_name: review.reviewer.display_name.clone(),
                rating,
                comment: review.comment.clone(),
                tone: ReplyTone::from_rating(rating),
            },
        };

        let text = tokio::time::timeout(self.timeout, self.generator.generate(&context))
            .await
            .map_err(|_| AutomationError::Timeout {
                operation: "reply generation",
                timeout: self.timeout,
            })??;

        let token = &credential.token;
        let api = self.api.as_ref();
        let review_id = review.id();
        let comment = text.as_str();
        with_fallback("reply to review", self.timeout, |endpoint| {
            api.reply_to_review(token, location, endpoint, review_id, comment)
        })
        .await?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::automation::CredentialPolicy;
    use crate::google::{Endpoint, ReviewReply, Reviewer};
    use crate::store::JsonStore;
    use crate::testing::{FakeBusinessApi, FakeGenerator, StaticCredentials};

    fn review(id: &str, stars: &str) -> Review {
        Review {
            review_id: id.into(),
            reviewer: Reviewer {
                display_name: format!("Reviewer {id}"),
            },
            star_rating: Some(stars.into()),
            comment: Some("Nice place".into()),
            ..Review::default()
        }
    }

    fn config() -> AutoReplyConfig {
        AutoReplyConfig {
            enabled: true,
            business_name: "Acme Cafe".into(),
            category: "restaurant".into(),
            ..AutoReplyConfig::default()
        }
    }

    struct Harness {
        pipeline: ReviewReplyPipeline,
        api: Arc<FakeBusinessApi>,
        generator: Arc<FakeGenerator>,
        replied: Arc<JsonStore<Vec<String>>>,
        activity: Arc<ActivityLog>,
    }

    fn harness(credentials: StaticCredentials, generator: FakeGenerator, api: FakeBusinessApi) -> Harness {
        let api = Arc::new(api);
        let generator = Arc::new(generator);
        let replied: Arc<JsonStore<Vec<String>>> = Arc::new(JsonStore::in_memory());
        let activity = Arc::new(ActivityLog::in_memory());
        let resolver = TokenResolver::new(
            Arc::new(credentials),
            CredentialPolicy::AnyCredentialFallback,
            Duration::from_secs(5),
        );
        Harness {
            pipeline: ReviewReplyPipeline::new(
                resolver,
                generator.clone(),
                api.clone(),
                replied.clone(),
                activity.clone(),
                Duration::from_secs(5),
                Duration::ZERO,
            ),
            api,
            generator,
            replied,
            activity,
        }
    }

    #[test]
    fn test_reply_gate() {
        let mut cfg = config();
        assert!(should_reply_to_review(&review("a", "ONE"), &cfg));

        cfg.reply_to_all = false;
        cfg.reply_to_negative = false;
        assert!(!should_reply_to_review(&review("a", "ONE"), &cfg));
        assert!(should_reply_to_review(&review("b", "FIVE"), &cfg));
        assert!(should_reply_to_review(&review("c", "THREE"), &cfg));

        cfg.reply_to_neutral = false;
        assert!(!should_reply_to_review(&review("c", "THREE"), &cfg));
    }

    #[tokio::test]
    async fn test_replies_once_per_review() {
        let api = FakeBusinessApi::new();
        api.set_reviews(vec![review("r1", "FIVE"), review("r2", "TWO")]);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Thank you!"),
            api,
        );

        let first = h.pipeline.run("loc-1", &config()).await.unwrap();
        assert_eq!(first.replied, 2);

        let second = h.pipeline.run("loc-1", &config()).await.unwrap();
        assert_eq!(second.total_reviews, 2);
        assert_eq!(second.unreplied, 0);
        assert_eq!(second.replied, 0);

        assert_eq!(h.api.replies().len(), 2);
        let ids = h.replied.replied_ids("loc-1").await.unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_checks_reply_once() {
        let api = FakeBusinessApi::new();
        api.set_reviews(vec![review("r1", "FIVE")]);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Thank you!").with_delay(Duration::from_millis(50)),
            api,
        );

        let cfg = config();
        let (a, b) = tokio::join!(h.pipeline.run("loc-1", &cfg), h.pipeline.run("loc-1", &cfg));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.replied + b.replied, 1);
        assert_eq!(h.api.replies().len(), 1);
        assert_eq!(h.generator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_replies_are_not_repeated() {
        let mut answered = review("r1", "FOUR");
        answered.review_reply = Some(ReviewReply {
            comment: "Already thanked".into(),
            update_time: None,
        });
        let api = FakeBusinessApi::new();
        api.set_reviews(vec![answered, review("r2", "FIVE")]);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Thanks"),
            api,
        );

        let result = h.pipeline.run("loc-1", &config()).await.unwrap();
        assert_eq!(result.unreplied, 1);
        assert_eq!(result.replied, 1);
        assert_eq!(h.api.replies()[0].review_id, "r2");
    }

    #[tokio::test]
    async fn test_tone_reaches_the_generator() {
        let api = FakeBusinessApi::new();
        api.set_reviews(vec![review("r1", "ONE")]);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Sorry"),
            api,
        );

        h.pipeline.run("loc-1", &config()).await.unwrap();
        let calls = h.generator.calls();
        assert!(matches!(
            calls[0].purpose,
            ContentPurpose::ReviewReply {
                rating: 1,
                tone: ReplyTone::Negative,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_gate_skips_filtered_reviews() {
        let api = FakeBusinessApi::new();
        api.set_reviews(vec![review("r1", "ONE"), review("r2", "FIVE")]);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Thanks"),
            api,
        );

        let mut cfg = config();
        cfg.reply_to_all = false;
        cfg.reply_to_negative = false;

        let result = h.pipeline.run("loc-1", &cfg).await.unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.replied, 1);
        assert_eq!(h.api.replies()[0].review_id, "r2");
    }

    #[tokio::test]
    async fn test_failed_reply_stays_eligible() {
        let api = FakeBusinessApi::new();
        api.set_reviews(vec![review("r1", "FIVE"), review("r2", "FIVE")]);
        api.fail_reply_for("r1");
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Thanks"),
            api,
        );

        let result = h.pipeline.run("loc-1", &config()).await.unwrap();
        assert_eq!(result.replied, 1);
        assert_eq!(result.failed, 1);

        let ids = h.replied.replied_ids("loc-1").await.unwrap();
        assert!(!ids.contains("r1"));
        assert!(ids.contains("r2"));

        let failures: Vec<_> = h
            .activity
            .read_all()
            .await
            .into_iter()
            .filter(|r| r.activity_type == ActivityType::ReviewReplyFailed)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].details["reviewId"], "r1");
    }

    #[tokio::test]
    async fn test_listing_failure_records_check_failed() {
        let api = FakeBusinessApi::new();
        api.fail_endpoint(Endpoint::AccountScoped);
        api.fail_endpoint(Endpoint::LocationScoped);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Thanks"),
            api,
        );

        h.pipeline.run("loc-1", &config()).await.unwrap_err();
        let records = h.activity.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].activity_type, ActivityType::ReviewCheckFailed);
    }

    #[tokio::test]
    async fn test_missing_credentials_records_check_failed() {
        let h = harness(
            StaticCredentials::new(),
            FakeGenerator::replying("Thanks"),
            FakeBusinessApi::new(),
        );

        let err = h.pipeline.run("loc-1", &config()).await.unwrap_err();
        assert!(err.requires_auth());
        let records = h.activity.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].details["reason"], "authentication_required");
    }
}
