//! Analysis and experiment orchestration.
//!
//! - [`config`]: [`ExperimentConfig`] with defaults, YAML loading and
//!   `GOAL_DRIFT_*` environment overrides.
//! - [`analyze`]: [`Analyzer`] turns a generation log into an evaluated
//!   corpus (cached) and writes the metric tables.
//! - [`experiment`]: [`ExperimentRunner`] generates with each configured
//!   model, merges the logs and analyzes the merge.
//!
//! # Example
//!
//! ```rust,ignore
//! use goal_drift::pipeline::{ExperimentConfig, ExperimentRunner};
//!
//! let config = ExperimentConfig::from_yaml_file("experiment.yaml")?.with_env_overrides()?;
//! let report = ExperimentRunner::new(config).run().await?;
//!
//! for row in &report.analysis.pass_rates {
//!     println!("{} {}: {:.3}", row.model, row.condition, row.pass_rate);
//! }
//! ```

pub mod analyze;
pub mod config;
pub mod experiment;

pub use analyze::{AnalysisConfig, AnalysisReport, Analyzer};
pub use config::{ExperimentConfig, RunSpec};
pub use experiment::{ExperimentReport, ExperimentRunner, ProviderFactory, RunOutcome};
