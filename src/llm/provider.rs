//! Completion provider abstraction.
//!
//! Every backend implements [`CompletionProvider`]. Generation code only ever
//! sees this trait, so stub providers can stand in for remote APIs in tests.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::providers::{AnthropicProvider, GeminiProvider, OpenAiProvider};

/// A text-generation backend.
///
/// `generate` never fails past this boundary: transport and API errors are
/// retried internally and, once exhausted, degrade to fewer completions.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// Model identifier recorded with every completion.
    fn model(&self) -> &str;

    /// Requests up to `n` independent completions for `prompt`.
    ///
    /// The result may be shorter than `n`, and is empty when `n` is 0.
    async fn generate(&self, prompt: &str, n: usize, temperature: f64) -> Vec<String>;
}

/// Clamps a sampling temperature into `[0, 1]`. NaN maps to 0.
pub fn clamp_temperature(temperature: f64) -> f64 {
    if temperature.is_nan() {
        0.0
    } else {
        temperature.clamp(0.0, 1.0)
    }
}

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Anthropic,
    #[serde(alias = "gemini")]
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-3.5-turbo",
            ProviderKind::OpenRouter => "openai/gpt-3.5-turbo",
            ProviderKind::Anthropic => "claude-3-haiku-20240307",
            ProviderKind::Google => "gemini-pro",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            _ => Err(LlmError::UnknownProvider(s.to_string())),
        }
    }
}

/// Builds a provider for `kind`, reading its API key from the environment.
pub fn create_provider(
    kind: ProviderKind,
    model: &str,
) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    let provider: Arc<dyn CompletionProvider> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_env(model)?),
        ProviderKind::OpenRouter => Arc::new(OpenAiProvider::openrouter_from_env(model)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_env(model)?),
        ProviderKind::Google => Arc::new(GeminiProvider::from_env(model)?),
    };
    tracing::info!(provider = %kind, model, "Completion provider initialized");
    Ok(provider)
}
