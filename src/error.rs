//! Error types for goal-drift operations.
//!
//! Defines error types for the major subsystems:
//! - Benchmark loading and task lookup
//! - LLM provider interactions
//! - Generation log, result cache and merge storage
//! - Configuration loading and validation
//!
//! Code evaluation deliberately has no error type: every failure inside the
//! sandbox is folded into a failed verdict.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading or querying benchmark tasks.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("Task '{0}' not found in benchmark (corpus and benchmark version mismatch?)")]
    TaskNotFound(String),

    #[error("Duplicate task id '{0}' in benchmark file")]
    DuplicateTask(String),

    #[error("Benchmark file '{path}' line {line}: {message}")]
    InvalidTask {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Benchmark file '{0}' contains no tasks")]
    Empty(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(String),

    #[error("Unknown provider '{0}' (expected openai, openrouter, anthropic or google)")]
    UnknownProvider(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Response contained no completion text")]
    EmptyResponse,
}

impl LlmError {
    /// Returns true if the failure is worth retrying.
    ///
    /// Network failures, rate limits, request timeouts and server errors are
    /// transient. Authentication, validation and parse failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited { .. } => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429 || *code == 408,
            _ => false,
        }
    }

    /// Server-provided minimum wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors that can occur while reading or writing logs, caches and merged files.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed record in '{path}' at line {line}: {message}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Schema mismatch in '{path}': missing column '{column}'")]
    SchemaMismatch { path: PathBuf, column: String },
}

impl StorageError {
    /// Wraps an IO error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
