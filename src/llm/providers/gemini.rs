//! Google Gemini `generateContent` adapter. One call per completion.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{api_key_from_env, error_from_response, http_client, mask_api_key, request_error};
use crate::error::LlmError;
use crate::llm::provider::{clamp_temperature, CompletionProvider, ProviderKind};
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::RetryPolicy;

/// Default Gemini API endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            retry: RetryPolicy::default(),
            limiter: RateLimiter::default(),
        }
    }

    /// Creates a provider from `GOOGLE_API_KEY`.
    pub fn from_env(model: &str) -> Result<Self, LlmError> {
        let api_key = api_key_from_env(ProviderKind::Google.api_key_env())?;
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

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn execute(&self, request: &ApiRequest) -> Result<String, LlmError> {
        self.limiter.acquire().await;

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
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
impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        ProviderKind::Google.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, n: usize, temperature: f64) -> Vec<String> {
        let request = ApiRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: clamp_temperature(temperature),
            },
        };

        let mut completions = Vec::with_capacity(n);
        for sample in 0..n {
            match self
                .retry
                .run("generate_content", || self.execute(&request))
                .await
            {
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
            "Gemini batch finished"
        );
        completions
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

impl ApiResponse {
    /// Text of the first candidate with any text parts.
    fn into_text(self) -> Option<String> {
        self.candidates.into_iter().find_map(|candidate| {
            let text: String = candidate
                .content?
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect();
            (!text.is_empty()).then_some(text)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_provider_new() {
        let provider = GeminiProvider::new("key", "gemini-pro");
        assert_eq!(provider.base_url(), GEMINI_BASE_URL);
        assert_eq!(provider.name(), "google");
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn test_request_uses_camel_case() {
        let request = ApiRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart {
                    text: Some("hi".to_string()),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.7 },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"generationConfig\":{\"temperature\":0.7}"));
        assert!(json.contains("\"parts\":[{\"text\":\"hi\"}]"));
    }

    #[test]
    fn test_response_joins_parts() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"candidates": [
                {"finishReason": "SAFETY"},
                {"content": {"role": "model", "parts": [{"text": "a"}, {"text": "b"}]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "ab");
    }

    #[test]
    fn test_response_blocked() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert!(response.into_text().is_none());
    }

    #[tokio::test]
    async fn test_generate_connection_error_degrades() {
        let provider = GeminiProvider::new("key", "gemini-pro")
            .with_base_url("http://localhost:65535")
            .with_retry_policy(RetryPolicy::none())
            .with_rate_limiter(RateLimiter::unlimited());

        assert!(provider.generate("prompt", 2, 0.5).await.is_empty());
    }
}
