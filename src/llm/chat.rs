//! OpenAI-compatible chat completions generator.
//!
//! Works against the public OpenAI API (bearer key) and Azure OpenAI
//! deployments (`api-key` header, `api-version` query parameter).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::GenerationError;
use crate::llm::prompt::build_messages;
use crate::llm::{ContentGenerator, PromptContext};

/// Chat completions backed content generator.
pub struct ChatCompletionsGenerator {
    client: Client,
    config: LlmConfig,
}

impl ChatCompletionsGenerator {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn is_azure(&self) -> bool {
        self.config.api_version.is_some()
    }

    fn api_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match &self.config.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base,
                urlencoding::encode(&self.config.model),
                urlencoding::encode(version)
            ),
            None => format!("{}/chat/completions", base),
        }
    }

    async fn send_request(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| GenerationError::NotConfigured("LLM API key is not set".to_string()))?;

        let url = self.api_url();
        tracing::debug!("Sending chat completion request to {}", url);

        let request = self.client.post(&url).json(body);
        let request = if self.is_azure() {
            request.header("api-key", api_key.expose_secret())
        } else {
            request.bearer_auth(api_key.expose_secret())
        };

        let response = request.send().await.map_err(|e| {
            tracing::error!("Chat completion request failed: {}", e);
            GenerationError::RequestFailed(e.to_string())
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let response_text = response.text().await.unwrap_or_default();

        tracing::debug!("Chat completion response status: {}", status);

        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(GenerationError::NotConfigured(format!(
                    "LLM endpoint rejected the API key (HTTP {})",
                    status
                )));
            }
            if status.as_u16() == 429 {
                let retry_after = headers
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(GenerationError::RateLimited(retry_after));
            }
            return Err(GenerationError::RequestFailed(format!(
                "HTTP {}: {}",
                status, response_text
            )));
        }

        serde_json::from_str(&response_text).map_err(|e| {
            GenerationError::InvalidResponse(format!("JSON parse error: {}. Raw: {}", e, response_text))
        })
    }
}

#[async_trait]
impl ContentGenerator for ChatCompletionsGenerator {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError> {
        let prompt = build_messages(context);

        let request = ChatCompletionRequest {
            model: (!self.is_azure()).then(|| self.config.model.clone()),
            messages: vec![
                ChatCompletionMessage {
                    role: "system".to_string(),
                    content: prompt.system,
                },
                ChatCompletionMessage {
                    role: "user".to_string(),
                    content: prompt.user,
                },
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let response = self.send_request(&request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(content)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
