//! Content generation for posts and review replies.
//!
//! The engine only depends on the [`ContentGenerator`] trait. The default
//! implementation talks to an OpenAI-compatible chat completions endpoint
//! (plain OpenAI or an Azure OpenAI deployment).

mod chat;
mod prompt;

pub use chat::ChatCompletionsGenerator;
pub use prompt::{ADDRESS_PREFIX, ChatPrompt, build_messages};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::LlmConfig;
use crate::error::GenerationError;

/// Tone bucket for review replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTone {
    Positive,
    Neutral,
    Negative,
}

impl ReplyTone {
    /// >= 4 stars positive, <= 2 negative, otherwise neutral.
    pub fn from_rating(rating: u8) -> Self {
        match rating {
            4.. => Self::Positive,
            0..=2 => Self::Negative,
            _ => Self::Neutral,
        }
    }
}

/// What the generated text is for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPurpose {
    Post,
    ReviewReply {
        reviewer_name: String,
        rating: u8,
        comment: Option<String>,
        tone: ReplyTone,
    },
}

/// Structured input handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptContext {
    pub business_name: String,
    pub category: String,
    pub keywords: Vec<String>,
    /// Human-readable address or locality, when known.
    pub location: Option<String>,
    pub website_url: Option<String>,
    pub purpose: ContentPurpose,
}

/// Prompt in, text out.
///
/// Implementations fail with an explicit error (never an empty string) when
/// generation is unavailable or misconfigured.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError>;
}

/// Create the default content generator from configuration.
///
/// A missing API key does not fail here: every generation then fails with
/// [`GenerationError::NotConfigured`], so the error surfaces per run.
pub fn create_content_generator(config: &LlmConfig) -> Arc<dyn ContentGenerator> {
    if config.api_key.is_none() {
        tracing::warn!("No LLM API key configured, content generation will fail until one is set");
    } else if config.api_version.is_some() {
        tracing::info!(deployment = %config.model, "Using Azure OpenAI chat completions");
    } else {
        tracing::info!(model = %config.model, "Using OpenAI-compatible chat completions");
    }
    Arc::new(ChatCompletionsGenerator::new(config.clone()))
}
