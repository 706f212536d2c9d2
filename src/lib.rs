//! goal-drift: measuring how prompt conditions shift LLM code correctness.
//!
//! The library samples completions for HumanEval-style tasks under a neutral
//! baseline and several instructional conditions, executes every completion
//! against the task's tests in an isolated interpreter, and reports pass-rate
//! drift, reliability and significance per model and condition.

// Core modules
pub mod benchmark;
pub mod cli;
pub mod corpus;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;

// Re-export commonly used error types
pub use error::{BenchmarkError, ConfigError, LlmError, StorageError};
