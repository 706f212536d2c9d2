//! Integration tests against real provider APIs.
//!
//! These tests make real API calls and need the provider's key in the
//! environment. Run with:
//! OPENAI_API_KEY=... cargo test --test llm_integration -- --ignored

use goal_drift::llm::{create_provider, CompletionProvider, ProviderKind};

const PROMPT: &str = "def add(a, b):\n    \"\"\"Return the sum of a and b.\"\"\"\n";

async fn assert_generates(kind: ProviderKind) {
    let provider = create_provider(kind, kind.default_model())
        .unwrap_or_else(|e| panic!("{} must be set for integration tests: {}", kind.api_key_env(), e));

    let completions = provider.generate(PROMPT, 2, 0.2).await;
    assert!(
        !completions.is_empty(),
        "{} returned no completions",
        provider.name()
    );
    assert!(completions.len() <= 2);
    for completion in &completions {
        assert!(!completion.trim().is_empty());
    }
}

#[tokio::test]
#[ignore] // Requires OPENAI_API_KEY
async fn test_openai_generation() {
    assert_generates(ProviderKind::OpenAi).await;
}

#[tokio::test]
#[ignore] // Requires OPENROUTER_API_KEY
async fn test_openrouter_generation() {
    assert_generates(ProviderKind::OpenRouter).await;
}

#[tokio::test]
#[ignore] // Requires ANTHROPIC_API_KEY
async fn test_anthropic_generation() {
    assert_generates(ProviderKind::Anthropic).await;
}

#[tokio::test]
#[ignore] // Requires GOOGLE_API_KEY
async fn test_gemini_generation() {
    assert_generates(ProviderKind::Google).await;
}

#[tokio::test]
async fn test_missing_key_is_reported() {
    // Unless a key is configured, construction fails with the variable name.
    let kind = ProviderKind::Anthropic;
    if std::env::var(kind.api_key_env()).is_ok() {
        return;
    }
    let err = create_provider(kind, kind.default_model()).err().unwrap();
    assert!(err.to_string().contains(kind.api_key_env()));
}
