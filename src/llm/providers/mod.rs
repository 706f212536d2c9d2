//! Completion provider backends.
//!
//! Each adapter owns its HTTP client, retry policy and rate limiter. The
//! helpers below cover what the backends share: client construction,
//! credential lookup and error-response mapping.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::error::LlmError;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Builds the shared HTTP client configuration.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Falling back to default HTTP client");
            Client::new()
        })
}

/// Reads a non-empty API key from `var`.
pub(crate) fn api_key_from_env(var: &str) -> Result<String, LlmError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(LlmError::MissingApiKey(var.to_string())),
    }
}

/// Masks an API key for logs.
pub(crate) fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

pub(crate) fn request_error(err: reqwest::Error) -> LlmError {
    LlmError::RequestFailed(err.to_string())
}

/// Converts a non-success HTTP response into an [`LlmError`].
///
/// All three backends report failures as `{"error": {"message": ...}}`;
/// anything else is passed through as raw text.
pub(crate) async fn error_from_response(response: Response) -> LlmError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());
    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|r| r.error.message)
        .unwrap_or(body);

    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited {
            message,
            retry_after,
        };
    }
    LlmError::ApiError {
        code: status.as_u16(),
        message,
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("abc"), "***");
        assert_eq!(mask_api_key("sk-1234567890abcdef"), "sk-1...cdef");
        assert_eq!(mask_api_key("ключ-1234567890-ключ"), "ключ...ключ");
        assert_eq!(mask_api_key("ääää"), "****");
    }

    #[test]
    fn test_missing_api_key() {
        let err = api_key_from_env("GOAL_DRIFT_TEST_UNSET_KEY_VAR").unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey(var) if var == "GOAL_DRIFT_TEST_UNSET_KEY_VAR"));
    }

    #[test]
    fn test_error_body_parsing() {
        let parsed: ApiErrorResponse =
            serde_json::from_str(r#"{"error": {"message": "invalid key", "type": "auth"}}"#)
                .unwrap();
        assert_eq!(parsed.error.message, "invalid key");
    }
}
