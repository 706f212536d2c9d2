//! Experiment configuration.
//!
//! Configuration comes from three layers, lowest priority first: built-in
//! defaults, a YAML file, and `GOAL_DRIFT_*` environment variables. The CLI
//! applies its flags on top through the builder methods.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `GOAL_DRIFT_BENCHMARK` | `benchmark` |
//! | `GOAL_DRIFT_ITERATIONS` | `iterations` |
//! | `GOAL_DRIFT_TEMPERATURE` | `temperature` |
//! | `GOAL_DRIFT_LIMIT` | `limit` |
//! | `GOAL_DRIFT_MERGED_OUTPUT` | `merged_output` |
//! | `GOAL_DRIFT_ANALYSIS_DIR` | `analysis_dir` |
//! | `GOAL_DRIFT_MAX_WORKERS` | `max_workers` |
//! | `GOAL_DRIFT_EVAL_TIMEOUT_SECS` | `eval_timeout_secs` |
//! | `GOAL_DRIFT_INTERPRETER` | `interpreter` |
//! | `GOAL_DRIFT_MEMORY_MB` | `memory_limit_mb` |
//! | `GOAL_DRIFT_ALPHA` | `alpha` |
//! | `GOAL_DRIFT_TOP_N` | `top_n` |
//! | `GOAL_DRIFT_USE_CACHE` | `use_cache` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::evaluation::{PoolConfig, SandboxConfig};
use crate::generation::{GenerationSettings, DEFAULT_ITERATIONS, DEFAULT_TEMPERATURE};
use crate::llm::ProviderKind;
use crate::metrics::{MetricsConfig, DEFAULT_ALPHA, DEFAULT_TOP_N};

use super::analyze::AnalysisConfig;

/// Upper bound for the per-sample timeout.
pub const MAX_EVAL_TIMEOUT_SECS: f64 = 3600.0;

/// Upper bound for the sandbox memory limit (1 TiB).
pub const MAX_MEMORY_LIMIT_MB: u64 = 1024 * 1024;

/// One generation run of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub provider: ProviderKind,
    /// Model name; the provider's default when omitted.
    #[serde(default)]
    pub model: Option<String>,
    /// Generation log written by this run.
    pub output: PathBuf,
}

impl RunSpec {
    pub fn new(provider: ProviderKind, output: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            model: None,
            output: output.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The configured model, or the provider's default.
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

/// Configuration for generation, evaluation and analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// HumanEval-format benchmark (`.jsonl` or `.jsonl.gz`).
    pub benchmark: PathBuf,
    /// Samples per (task, condition).
    pub iterations: usize,
    /// Sampling temperature.
    pub temperature: f64,
    /// Only the first `limit` tasks are sampled.
    pub limit: Option<usize>,
    /// Generation runs, executed in order.
    pub runs: Vec<RunSpec>,
    /// Destination of the merged generation log.
    pub merged_output: PathBuf,
    /// Directory for the evaluated corpus and metric tables.
    pub analysis_dir: PathBuf,
    /// Evaluation concurrency. Hardware parallelism when unset.
    pub max_workers: Option<usize>,
    /// Hard wall-clock limit per sample, in seconds.
    pub eval_timeout_secs: f64,
    /// Interpreter used to execute samples.
    pub interpreter: String,
    /// Address-space limit per sample in MB. 0 disables it.
    pub memory_limit_mb: u64,
    /// Significance level.
    pub alpha: f64,
    /// Rows per (model, condition) in the drift ranking.
    pub top_n: usize,
    /// Reuse a matching evaluated-corpus cache.
    pub use_cache: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            benchmark: PathBuf::from("data/HumanEval.jsonl.gz"),
            iterations: DEFAULT_ITERATIONS,
            temperature: DEFAULT_TEMPERATURE,
            limit: None,
            runs: Vec::new(),
            merged_output: PathBuf::from("data/merged_results.jsonl"),
            analysis_dir: PathBuf::from("analysis_results"),
            max_workers: None,
            eval_timeout_secs: 3.0,
            interpreter: "python3".to_string(),
            memory_limit_mb: 1024,
            alpha: DEFAULT_ALPHA,
            top_n: DEFAULT_TOP_N,
            use_cache: true,
        }
    }
}

impl ExperimentConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `GOAL_DRIFT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Loads a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `GOAL_DRIFT_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("GOAL_DRIFT_BENCHMARK") {
            self.benchmark = PathBuf::from(val);
        }
        if let Some(val) = lookup("GOAL_DRIFT_ITERATIONS") {
            self.iterations = parse_env_value(&val, "GOAL_DRIFT_ITERATIONS")?;
        }
        if let Some(val) = lookup("GOAL_DRIFT_TEMPERATURE") {
            self.temperature = parse_env_value(&val, "GOAL_DRIFT_TEMPERATURE")?;
        }
        if let Some(val) = lookup("GOAL_DRIFT_LIMIT") {
            self.limit = Some(parse_env_value(&val, "GOAL_DRIFT_LIMIT")?);
        }
        if let Some(val) = lookup("GOAL_DRIFT_MERGED_OUTPUT") {
            self.merged_output = PathBuf::from(val);
        }
        if let Some(val) = lookup("GOAL_DRIFT_ANALYSIS_DIR") {
            self.analysis_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("GOAL_DRIFT_MAX_WORKERS") {
            self.max_workers = Some(parse_env_value(&val, "GOAL_DRIFT_MAX_WORKERS")?);
        }
        if let Some(val) = lookup("GOAL_DRIFT_EVAL_TIMEOUT_SECS") {
            self.eval_timeout_secs = parse_env_value(&val, "GOAL_DRIFT_EVAL_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("GOAL_DRIFT_INTERPRETER") {
            self.interpreter = val;
        }
        if let Some(val) = lookup("GOAL_DRIFT_MEMORY_MB") {
            self.memory_limit_mb = parse_env_value(&val, "GOAL_DRIFT_MEMORY_MB")?;
        }
        if let Some(val) = lookup("GOAL_DRIFT_ALPHA") {
            self.alpha = parse_env_value(&val, "GOAL_DRIFT_ALPHA")?;
        }
        if let Some(val) = lookup("GOAL_DRIFT_TOP_N") {
            self.top_n = parse_env_value(&val, "GOAL_DRIFT_TOP_N")?;
        }
        if let Some(val) = lookup("GOAL_DRIFT_USE_CACHE") {
            self.use_cache = parse_env_bool(&val, "GOAL_DRIFT_USE_CACHE")?;
        }
        Ok(self)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "iterations must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.limit == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "limit must be greater than 0 when set".to_string(),
            ));
        }

        if self.max_workers == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be greater than 0 when set".to_string(),
            ));
        }

        if !self.eval_timeout_secs.is_finite()
            || self.eval_timeout_secs <= 0.0
            || self.eval_timeout_secs > MAX_EVAL_TIMEOUT_SECS
        {
            return Err(ConfigError::ValidationFailed(format!(
                "eval_timeout_secs must be between 0 and {} seconds",
                MAX_EVAL_TIMEOUT_SECS
            )));
        }

        if self.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
            return Err(ConfigError::ValidationFailed(format!(
                "memory_limit_mb must be at most {}",
                MAX_MEMORY_LIMIT_MB
            )));
        }

        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "interpreter cannot be empty".to_string(),
            ));
        }

        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConfigError::ValidationFailed(
                "alpha must be between 0.0 and 1.0 (exclusive)".to_string(),
            ));
        }

        if self.top_n == 0 {
            return Err(ConfigError::ValidationFailed(
                "top_n must be greater than 0".to_string(),
            ));
        }

        for (i, run) in self.runs.iter().enumerate() {
            if run.model_name().trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "runs[{}].model cannot be empty",
                    i
                )));
            }
            if run.output.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "runs[{}].output cannot be empty",
                    i
                )));
            }
        }

        Ok(())
    }

    /// Per-sample timeout.
    pub fn eval_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.eval_timeout_secs.clamp(0.0, MAX_EVAL_TIMEOUT_SECS))
            .unwrap_or(crate::evaluation::sandbox::DEFAULT_TIMEOUT)
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings::default()
            .with_iterations(self.iterations)
            .with_temperature(self.temperature)
            .with_limit(self.limit)
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::new(self.interpreter.clone())
            .with_timeout(self.eval_timeout())
            .with_memory_mb(self.memory_limit_mb)
    }

    pub fn pool_config(&self) -> PoolConfig {
        match self.max_workers {
            Some(workers) => PoolConfig::new(workers),
            None => PoolConfig::default(),
        }
    }

    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            alpha: self.alpha,
            top_n: self.top_n,
        }
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            pool: self.pool_config(),
            metrics: self.metrics_config(),
            use_cache: self.use_cache,
        }
    }

    /// Builder method to set the benchmark path.
    pub fn with_benchmark(mut self, path: impl Into<PathBuf>) -> Self {
        self.benchmark = path.into();
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_run(mut self, run: RunSpec) -> Self {
        self.runs.push(run);
        self
    }

    pub fn with_merged_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.merged_output = path.into();
        self
    }

    pub fn with_analysis_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.analysis_dir = dir.into();
        self
    }

    pub fn with_max_workers(mut self, workers: Option<usize>) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
