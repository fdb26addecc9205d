//! Generate-and-publish pipeline for auto-posts.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{Value, json};

use crate::automation::activity::{ActivityLog, ActivityType, failure_details};
use crate::automation::credentials::{TokenResolver, TokenSource};
use crate::automation::cta::{CallToAction, derive_call_to_action};
use crate::automation::types::AutoPostingConfig;
use crate::error::{AutomationError, Result};
use crate::google::{BusinessProfileApi, Endpoint, LocalPost, LocationRef, with_fallback};
use crate::llm::{ADDRESS_PREFIX, ContentGenerator, ContentPurpose, PromptContext};

/// Keywords handed to the generator per post.
const MAX_PROMPT_KEYWORDS: usize = 5;

/// Post body plus the button it will carry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub content: String,
    pub call_to_action: Option<CallToAction>,
}

/// Outcome of a successful post.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResult {
    pub post_name: String,
    pub content: String,
    pub call_to_action: Option<CallToAction>,
    pub search_url: Option<String>,
    pub endpoint: Endpoint,
    /// User whose credential was used; `None` for caller-supplied tokens.
    pub credential_user: Option<String>,
    pub via_fallback_credential: bool,
}

pub struct PostingPipeline {
    resolver: TokenResolver,
    generator: Arc<dyn ContentGenerator>,
    api: Arc<dyn BusinessProfileApi>,
    activity: Arc<ActivityLog>,
    timeout: Duration,
}

impl PostingPipeline {
    pub fn new(
        resolver: TokenResolver,
        generator: Arc<dyn ContentGenerator>,
        api: Arc<dyn BusinessProfileApi>,
        activity: Arc<ActivityLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            generator,
            api,
            activity,
            timeout,
        }
    }

    /// Generate post text and CTA without publishing anything.
    pub async fn generate_post_content(&self, config: &AutoPostingConfig) -> Result<GeneratedContent> {
        let context = build_post_context(config);
        let text = tokio::time::timeout(self.timeout, self.generator.generate(&context))
            .await
            .map_err(|_| AutomationError::Timeout {
                operation: "content generation",
                timeout: self.timeout,
            })??;

        Ok(GeneratedContent {
            content: ensure_address_line(&text, context.location.as_deref()),
            call_to_action: derive_call_to_action(config),
        })
    }

    /// Run one post for `location_id`, recording exactly one activity entry.
    pub async fn run(
        &self,
        location_id: &str,
        config: &AutoPostingConfig,
        source: &TokenSource,
    ) -> Result<PostResult> {
        match self.execute(location_id, config, source).await {
            Ok(result) => {
                tracing::info!(
                    location_id,
                    post = %result.post_name,
                    endpoint = ?result.endpoint,
                    "Auto-post published"
                );
                self.activity
                    .record(
                        location_id,
                        ActivityType::PostCreated,
                        json!({
                            "postName": result.post_name,
                            "content": result.content,
                            "callToAction": result.call_to_action,
                            "searchUrl": result.search_url,
                            "endpoint": result.endpoint,
                            "businessName": config.business_name,
                            "viaFallbackCredential": result.via_fallback_credential,
                        }),
                    )
                    .await;
                Ok(result)
            }
            Err(e) => {
                tracing::error!(location_id, error = %e, "Auto-post failed");
                let mut details = failure_details(&e);
                details.insert("businessName".into(), Value::from(config.business_name.clone()));
                self.activity
                    .record(location_id, ActivityType::PostFailed, Value::Object(details))
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        location_id: &str,
        config: &AutoPostingConfig,
        source: &TokenSource,
    ) -> Result<PostResult> {
        let credential = self.resolver.resolve(&config.user_id, source).await?;
        let generated = self.generate_post_content(config).await?;

        let location = LocationRef::new(location_id, config.account_id.as_deref());
        let post = LocalPost::standard(generated.content.clone(), generated.call_to_action.clone());

        let token = &credential.token;
        let location_ref = &location;
        let post_ref = &post;
        let api = self.api.as_ref();
        let (created, endpoint) = with_fallback("create local post", self.timeout, |endpoint| {
            api.create_local_post(token, location_ref, endpoint, post_ref)
        })
        .await?;

        Ok(PostResult {
            post_name: created.name,
            content: generated.content,
            call_to_action: generated.call_to_action,
            search_url: created.search_url,
            endpoint,
            credential_user: credential.user_id,
            via_fallback_credential: credential.via_fallback,
        })
    }
}

/// Prompt input for a post: business facts, a random keyword subset and the
/// display address.
pub fn build_post_context(config: &AutoPostingConfig) -> PromptContext {
    let keywords = config.keyword_list();
    let keywords = if keywords.len() > MAX_PROMPT_KEYWORDS {
        keywords
            .choose_multiple(&mut rand::thread_rng(), MAX_PROMPT_KEYWORDS)
            .cloned()
            .collect()
    } else {
        keywords
    };

    PromptContext {
        business_name: config.business_name.clone(),
        category: config.category.clone(),
        keywords,
        location: config.address.as_ref().and_then(|a| a.display_line()),
        website_url: config.website_url.clone(),
        purpose: ContentPurpose::Post,
    }
}

/// Make sure `content` ends with the address line for `address`.
///
/// An address line with different text is replaced; a matching one is kept.
pub fn ensure_address_line(content: &str, address: Option<&str>) -> String {
    let content = content.trim();
    let Some(address) = address else {
        return content.to_string();
    };

    let line = format!("{ADDRESS_PREFIX}{address}");
    if content.contains(&line) {
        return content.to_string();
    }

    let marker = ADDRESS_PREFIX.trim_end();
    let body = content
        .lines()
        .filter(|l| !l.trim_start().starts_with(marker))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{}\n\n{}", body.trim_end(), line)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::*;
    use crate::automation::CredentialPolicy;
    use crate::automation::cta::ActionType;
    use crate::automation::types::{BusinessAddress, CallToActionSpec};
    use crate::testing::{FakeBusinessApi, FakeGenerator, StaticCredentials};

    fn acme() -> AutoPostingConfig {
        AutoPostingConfig {
            enabled: true,
            business_name: "Acme Cafe".into(),
            category: "restaurant".into(),
            keywords: "coffee,pastries".into(),
            website_url: Some("https://acme.example".into()),
            address: Some(BusinessAddress {
                address_lines: vec!["12 Main St".into()],
                locality: Some("Pune".into()),
                administrative_area: Some("Maharashtra".into()),
                postal_code: Some("411001".into()),
            }),
            button: Some(CallToActionSpec::default()),
            ..AutoPostingConfig::default()
        }
    }

    struct Harness {
        pipeline: PostingPipeline,
        generator: Arc<FakeGenerator>,
        api: Arc<FakeBusinessApi>,
        activity: Arc<ActivityLog>,
    }

    fn harness(credentials: StaticCredentials, generator: FakeGenerator, api: FakeBusinessApi) -> Harness {
        let generator = Arc::new(generator);
        let api = Arc::new(api);
        let activity = Arc::new(ActivityLog::in_memory());
        let resolver = TokenResolver::new(
            Arc::new(credentials),
            CredentialPolicy::AnyCredentialFallback,
            Duration::from_secs(5),
        );
        Harness {
            pipeline: PostingPipeline::new(
                resolver,
                generator.clone(),
                api.clone(),
                activity.clone(),
                Duration::from_secs(5),
            ),
            generator,
            api,
            activity,
        }
    }

    #[test]
    fn test_address_line_appended_when_missing() {
        let out = ensure_address_line("Fresh coffee!", Some("12 Main St, Pune"));
        assert_eq!(out, "Fresh coffee!\n\n📍 Address: 12 Main St, Pune");
    }

    #[test]
    fn test_address_line_kept_when_present() {
        let text = "Fresh coffee!\n\n📍 Address: 12 Main St, Pune";
        assert_eq!(ensure_address_line(text, Some("12 Main St, Pune")), text);
    }

    #[test]
    fn test_wrong_address_line_replaced() {
        let out = ensure_address_line("Hi!\n📍 Address: somewhere else", Some("12 Main St"));
        assert_eq!(out, "Hi!\n\n📍 Address: 12 Main St");
    }

    #[test]
    fn test_keyword_subset_is_bounded() {
        let mut config = acme();
        config.keywords = "a,b,c,d,e,f,g,h".into();
        let context = build_post_context(&config);
        assert_eq!(context.keywords.len(), MAX_PROMPT_KEYWORDS);
        assert!(context.keywords.iter().all(|k| config.keyword_list().contains(k)));
    }

    #[tokio::test]
    async fn test_successful_post_records_post_created() {
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Try our new pastries!"),
            FakeBusinessApi::new(),
        );

        let result = h
            .pipeline
            .run("loc-1", &acme(), &TokenSource::Provider)
            .await
            .unwrap();

        assert_eq!(result.endpoint, Endpoint::AccountScoped);
        assert_eq!(
            result.call_to_action.as_ref().map(|c| c.action_type),
            Some(ActionType::Order)
        );
        assert!(result.content.ends_with("📍 Address: 12 Main St, Pune, Maharashtra 411001"));

        let prompts = h.generator.calls();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].category, "restaurant");

        let posts = h.api.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].token, "tok");

        let records = h.activity.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].activity_type, ActivityType::PostCreated);
    }

    #[tokio::test]
    async fn test_primary_failure_uses_fallback_endpoint() {
        let api = FakeBusinessApi::new();
        api.fail_endpoint(Endpoint::AccountScoped);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Hello"),
            api,
        );

        let result = h
            .pipeline
            .run("loc-1", &acme(), &TokenSource::Provider)
            .await
            .unwrap();
        assert_eq!(result.endpoint, Endpoint::LocationScoped);
        assert_eq!(h.api.post_attempts(), 2);
    }

    #[tokio::test]
    async fn test_no_credentials_is_soft_failure_with_one_record() {
        let h = harness(
            StaticCredentials::new(),
            FakeGenerator::replying("unused"),
            FakeBusinessApi::new(),
        );

        let err = h
            .pipeline
            .run("loc-1", &acme(), &TokenSource::Provider)
            .await
            .unwrap_err();
        assert!(err.requires_auth());
        assert!(h.generator.calls().is_empty());

        let records = h.activity.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].activity_type, ActivityType::PostFailed);
        assert_eq!(records[0].details["reason"], "authentication_required");
        assert_eq!(records[0].details["fallbackAttempted"], true);
    }

    #[tokio::test]
    async fn test_generation_failure_is_terminal() {
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::failing(),
            FakeBusinessApi::new(),
        );

        let err = h
            .pipeline
            .run("loc-1", &acme(), &TokenSource::Provider)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "system_error");
        assert!(h.api.posts().is_empty());

        let records = h.activity.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].details["reason"], "system_error");
    }

    #[tokio::test]
    async fn test_exhausted_remote_failure_records_status() {
        let api = FakeBusinessApi::new();
        api.fail_endpoint(Endpoint::AccountScoped);
        api.fail_endpoint(Endpoint::LocationScoped);
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Hello"),
            api,
        );

        h.pipeline
            .run("loc-1", &acme(), &TokenSource::Provider)
            .await
            .unwrap_err();

        let records = h.activity.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].details["status"], 500);
    }

    #[tokio::test]
    async fn test_call_now_without_phone_still_posts() {
        let mut config = acme();
        config.button = Some(CallToActionSpec {
            button_type: crate::automation::ButtonType::CallNow,
            ..CallToActionSpec::default()
        });
        let h = harness(
            StaticCredentials::new().with_token("default", "tok"),
            FakeGenerator::replying("Hello"),
            FakeBusinessApi::new(),
        );

        let result = h
            .pipeline
            .run("loc-1", &config, &TokenSource::Provider)
            .await
            .unwrap();
        assert_eq!(result.call_to_action, None);
        assert_eq!(h.api.posts()[0].post.call_to_action, None);
    }

    #[tokio::test]
    async fn test_supplied_token_is_used_verbatim() {
        let h = harness(
            StaticCredentials::new(),
            FakeGenerator::replying("Hello"),
            FakeBusinessApi::new(),
        );

        let result = h
            .pipeline
            .run(
                "loc-1",
                &acme(),
                &TokenSource::Supplied(SecretString::from("caller-token")),
            )
            .await
            .unwrap();
        assert_eq!(result.credential_user, None);
        assert_eq!(h.api.posts()[0].token, "caller-token");
    }
}
