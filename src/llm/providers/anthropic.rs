//! Anthropic messages-API adapter.
//!
//! The messages API returns one completion per call, so `generate` issues
//! `n` sequential calls paced by the rate limiter. A failed call only costs
//! its own sample.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{api_key_from_env, error_from_response, http_client, mask_api_key, request_error};
use crate::error::LlmError;
use crate::llm::provider::{clamp_temperature, CompletionProvider, ProviderKind};
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::RetryPolicy;

/// Default Anthropic API endpoint.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output token cap per completion.
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            model: model.into(),
            retry: RetryPolicy::default(),
            limiter: RateLimiter::default(),
        }
    }

    /// Creates a provider from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: &str) -> Result<Self, LlmError> {
        let api_key = api_key_from_env(ProviderKind::Anthropic.api_key_env())?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key_masked(&self) -> String {
        mask_api_key(&self.api_key)
    }

    async fn execute(&self, request: &ApiRequest) -> Result<String, LlmError> {
        self.limiter.acquire().await;

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        api_response.into_text().ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        ProviderKind::Anthropic.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, n: usize, temperature: f64) -> Vec<String> {
        let request = ApiRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: clamp_temperature(temperature),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut completions = Vec::with_capacity(n);
        for sample in 0..n {
            match self.retry.run("messages", || self.execute(&request)).await {
                Ok(text) => completions.push(text),
                Err(err) => warn!(
                    provider = self.name(),
                    model = %self.model,
                    sample,
                    error = %err,
                    "Completion failed, skipping sample"
                ),
            }
        }

        debug!(
            provider = self.name(),
            model = %self.model,
            requested = n,
            received = completions.len(),
            "Messages batch finished"
        );
        completions
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

impl ApiResponse {
    /// Concatenates the text blocks; `None` if there are none.
    fn into_text(self) -> Option<String> {
        let texts: Vec<String> = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}
