//! OpenAI chat-completions adapter.
//!
//! Also serves OpenRouter, which speaks the same wire format. A single
//! request asks for all `n` choices at once.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{api_key_from_env, error_from_response, http_client, mask_api_key, request_error};
use crate::error::LlmError;
use crate::llm::provider::{clamp_temperature, CompletionProvider, ProviderKind};
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::RetryPolicy;

/// Default OpenAI API endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default OpenRouter API endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Provider for OpenAI-compatible chat-completions APIs.
pub struct OpenAiProvider {
    client: Client,
    kind: ProviderKind,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl OpenAiProvider {
    /// Creates an OpenAI provider.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            kind: ProviderKind::OpenAi,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            retry: RetryPolicy::default(),
            limiter: RateLimiter::default(),
        }
    }

    /// Creates a provider routed through OpenRouter.
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::OpenRouter,
            base_url: OPENROUTER_BASE_URL.to_string(),
            ..Self::new(api_key, model)
        }
    }

    /// Creates an OpenAI provider from `OPENAI_API_KEY`.
    pub fn from_env(model: &str) -> Result<Self, LlmError> {
        let api_key = api_key_from_env(ProviderKind::OpenAi.api_key_env())?;
        Ok(Self::new(api_key, model))
    }

    /// Creates an OpenRouter provider from `OPENROUTER_API_KEY`.
    pub fn openrouter_from_env(model: &str) -> Result<Self, LlmError> {
        let api_key = api_key_from_env(ProviderKind::OpenRouter.api_key_env())?;
        Ok(Self::openrouter(api_key, model))
    }

    /// Overrides the base URL (proxies, tests).
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

    /// Executes a single request (no retry).
    async fn execute(&self, request: &ApiRequest) -> Result<Vec<String>, LlmError> {
        self.limiter.acquire().await;

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request);
        if self.kind == ProviderKind::OpenRouter {
            builder = builder
                .header("HTTP-Referer", "https://goal-drift.local")
                .header("X-Title", "goal-drift");
        }

        let response = builder.send().await.map_err(request_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let completions = api_response.into_completions();
        if completions.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(completions)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, n: usize, temperature: f64) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }

        let request = ApiRequest {
            model: self.model.clone(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            n,
            temperature: clamp_temperature(temperature),
        };

        match self
            .retry
            .run("chat_completions", || self.execute(&request))
            .await
        {
            Ok(mut completions) => {
                completions.truncate(n);
                debug!(
                    provider = self.name(),
                    model = %self.model,
                    requested = n,
                    received = completions.len(),
                    "Chat completion finished"
                );
                completions
            }
            Err(err) => {
                warn!(
                    provider = self.name(),
                    model = %self.model,
                    requested = n,
                    error = %err,
                    "Generation failed, returning no completions"
                );
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    n: usize,
    temperature: f64,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

impl ApiResponse {
    fn into_completions(self) -> Vec<String> {
        self.choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
