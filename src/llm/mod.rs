//! LLM completion providers.
//!
//! The generation orchestrator talks to models exclusively through the
//! [`CompletionProvider`] trait. Backends live in [`providers`]; each owns a
//! [`RetryPolicy`] for transient failures and a [`RateLimiter`] that paces
//! its calls.
//!
//! ```ignore
//! use goal_drift::llm::{create_provider, ProviderKind};
//!
//! let provider = create_provider("anthropic".parse()?, "claude-3-haiku-20240307")?;
//! let completions = provider.generate("def add(a, b):\n", 10, 0.7).await;
//! ```

pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod retry;

pub use provider::{clamp_temperature, create_provider, CompletionProvider, ProviderKind};
pub use providers::{AnthropicProvider, GeminiProvider, OpenAiProvider};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
