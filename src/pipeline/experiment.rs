//! Multi-model experiments: generate per run, merge, analyze.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use super::analyze::{AnalysisReport, Analyzer};
use super::config::{ExperimentConfig, RunSpec};
use crate::benchmark::{JsonlTaskSource, TaskSet};
use crate::corpus::{merge_with_report, MergeReport};
use crate::error::LlmError;
use crate::evaluation::{CodeEvaluator, Sandbox};
use crate::generation::{GenerationRunner, GenerationSummary};
use crate::llm::{create_provider, CompletionProvider, ProviderKind};

/// Builds the provider for a run.
pub type ProviderFactory =
    Arc<dyn Fn(&RunSpec) -> Result<Arc<dyn CompletionProvider>, LlmError> + Send + Sync>;

/// Outcome of one generation run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub provider: ProviderKind,
    pub model: String,
    pub output: PathBuf,
    pub summary: Option<GenerationSummary>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub runs: Vec<RunOutcome>,
    pub merge: MergeReport,
    pub analysis: AnalysisReport,
}

/// Runs every configured generation, merges the logs and analyzes the result.
///
/// A failing run is logged and recorded in the report; it does not stop the
/// experiment.
pub struct ExperimentRunner {
    config: ExperimentConfig,
    provider_factory: ProviderFactory,
    evaluator: Option<Arc<dyn CodeEvaluator>>,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            config,
            provider_factory: Arc::new(|run: &RunSpec| create_provider(run.provider, run.model_name())),
            evaluator: None,
        }
    }

    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = factory;
        self
    }

    /// Evaluates with `evaluator` instead of a sandbox built from the config.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn CodeEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<ExperimentReport> {
        self.config.validate().context("Invalid experiment configuration")?;

        let source = JsonlTaskSource::new(&self.config.benchmark);
        let tasks = TaskSet::load(&source)
            .with_context(|| format!("Failed to load benchmark {}", self.config.benchmark.display()))?;

        if self.config.runs.is_empty() {
            warn!("Experiment has no generation runs, analyzing existing logs only");
        }

        let mut runs = Vec::with_capacity(self.config.runs.len());
        for (index, run) in self.config.runs.iter().enumerate() {
            info!(
                run = index + 1,
                of = self.config.runs.len(),
                provider = %run.provider,
                model = run.model_name(),
                "Starting experiment run"
            );

            let outcome = match self.run_generation(&tasks, run).await {
                Ok(summary) => RunOutcome {
                    provider: run.provider,
                    model: run.model_name().to_string(),
                    output: run.output.clone(),
                    summary: Some(summary),
                    error: None,
                },
                Err(e) => {
                    error!(
                        provider = %run.provider,
                        model = run.model_name(),
                        error = %format!("{:#}", e),
                        "Generation run failed, continuing"
                    );
                    RunOutcome {
                        provider: run.provider,
                        model: run.model_name().to_string(),
                        output: run.output.clone(),
                        summary: None,
                        error: Some(format!("{:#}", e)),
                    }
                }
            };
            runs.push(outcome);
        }

        let inputs: Vec<&PathBuf> = self.config.runs.iter().map(|r| &r.output).collect();
        let merge = merge_with_report(&self.config.merged_output, &inputs)
            .context("Failed to merge generation logs")?;

        let evaluator = self
            .evaluator
            .clone()
            .unwrap_or_else(|| Arc::new(Sandbox::new(self.config.sandbox_config())));
        let analyzer = Analyzer::new(tasks, evaluator, self.config.analysis_config());
        let analysis = analyzer
            .run(&self.config.merged_output, &self.config.analysis_dir)
            .await?;

        info!(
            runs = runs.len(),
            failed_runs = runs.iter().filter(|r| !r.succeeded()).count(),
            merged = merge.unique,
            records = analysis.records,
            "Experiment complete"
        );

        Ok(ExperimentReport {
            runs,
            merge,
            analysis,
        })
    }

    async fn run_generation(&self, tasks: &TaskSet, run: &RunSpec) -> Result<GenerationSummary> {
        let provider = (self.provider_factory)(run)
            .with_context(|| format!("Cannot create {} provider", run.provider))?;
        let runner = GenerationRunner::new(provider, self.config.generation_settings());
        let summary = runner
            .run(tasks, &run.output)
            .await
            .with_context(|| format!("Generation into {} failed", run.output.display()))?;
        Ok(summary)
    }
}
