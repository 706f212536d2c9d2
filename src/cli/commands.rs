//! CLI command definitions for goal-drift.
//!
//! Four subcommands cover the workflow: `generate` samples one model into a
//! generation log, `merge` combines logs, `analyze` evaluates a log and writes
//! metric tables, and `experiment` runs all of it from a YAML file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::benchmark::{JsonlTaskSource, TaskSet};
use crate::corpus::merge_with_report;
use crate::evaluation::{CodeEvaluator, Sandbox};
use crate::generation::GenerationRunner;
use crate::llm::{create_provider, ProviderKind};
use crate::metrics::PassRateRow;
use crate::pipeline::{AnalysisReport, Analyzer, ExperimentConfig, ExperimentRunner};
use crate::prompts::Condition;

/// Default generation log written by `generate`.
const DEFAULT_GENERATION_LOG: &str = "data/generations.jsonl";

/// Measure how instructional pressure in prompts shifts code correctness.
#[derive(Parser)]
#[command(name = "goal-drift")]
#[command(about = "Measure goal drift of LLM code generation under prompt conditions")]
#[command(version)]
#[command(
    long_about = "goal-drift samples LLM completions for HumanEval-style tasks under neutral, speed, caution and reputation conditions, executes them against the task tests, and reports how pass rates drift from the neutral baseline.\n\nExample usage:\n  goal-drift generate --provider anthropic -o data/claude.jsonl\n  goal-drift merge -o data/merged.jsonl data/claude.jsonl data/gpt.jsonl\n  goal-drift analyze -i data/merged.jsonl -o analysis_results"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Sample completions from one model into a generation log.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Merge generation logs, keeping the first record per key.
    Merge(MergeArgs),

    /// Evaluate a generation log and write metric tables.
    Analyze(AnalyzeArgs),

    /// Run generation, merge and analysis from a YAML configuration.
    #[command(alias = "exp")]
    Experiment(ExperimentArgs),
}

/// Arguments for `goal-drift generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Provider backend (openai, openrouter, anthropic, google).
    #[arg(short, long, default_value = "openai")]
    pub provider: ProviderKind,

    /// Model name. Defaults to the provider's default model.
    #[arg(short, long)]
    pub model: Option<String>,

    /// HumanEval-format benchmark (.jsonl or .jsonl.gz).
    #[arg(short, long)]
    pub benchmark: Option<PathBuf>,

    /// Generation log to write. Existing records are kept and resumed from.
    #[arg(short, long, default_value = DEFAULT_GENERATION_LOG)]
    pub output: PathBuf,

    /// Samples per (task, condition).
    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,

    /// Sampling temperature.
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Only sample the first N tasks.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Comma-separated conditions to sample. All conditions by default.
    #[arg(long, value_delimiter = ',')]
    pub conditions: Vec<Condition>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `goal-drift merge`.
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Merged log to write.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Input logs, in priority order.
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `goal-drift analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Generation log to analyze. Defaults to the configured merged output.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Directory for the evaluated corpus and metric tables.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// HumanEval-format benchmark (.jsonl or .jsonl.gz).
    #[arg(short, long)]
    pub benchmark: Option<PathBuf>,

    /// Concurrent evaluations. Hardware parallelism by default.
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    /// Per-sample timeout in seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Interpreter used to execute samples.
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Significance level for the Mann-Whitney tests.
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Rows per (model, condition) in the drift ranking.
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Re-evaluate even if a matching cache exists.
    #[arg(long)]
    pub no_cache: bool,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `goal-drift experiment`.
#[derive(Parser, Debug)]
pub struct ExperimentArgs {
    /// YAML experiment configuration.
    #[arg(short, long, env = "GOAL_DRIFT_CONFIG")]
    pub config: PathBuf,

    /// Re-evaluate even if a matching cache exists.
    #[arg(long)]
    pub no_cache: bool,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Merge(args) => run_merge_command(args),
        Commands::Analyze(args) => run_analyze_command(args).await,
        Commands::Experiment(args) => run_experiment_command(args).await,
    }
}

// ============================================================================
// Generate
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateOutput {
    provider: String,
    model: String,
    output: PathBuf,
    tasks: usize,
    requested: usize,
    obtained: usize,
    skipped_groups: usize,
    short_batches: usize,
    total_duration_ms: u64,
}

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let mut config = ExperimentConfig::from_env()?;
    if let Some(benchmark) = args.benchmark {
        config = config.with_benchmark(benchmark);
    }
    if let Some(iterations) = args.iterations {
        config = config.with_iterations(iterations);
    }
    if let Some(temperature) = args.temperature {
        config = config.with_temperature(temperature);
    }
    if args.limit.is_some() {
        config = config.with_limit(args.limit);
    }
    config.validate()?;

    let model = args
        .model
        .unwrap_or_else(|| args.provider.default_model().to_string());
    let provider = create_provider(args.provider, &model).with_context(|| {
        format!(
            "Failed to initialize {} provider. Set {}.",
            args.provider,
            args.provider.api_key_env()
        )
    })?;

    let tasks = load_tasks(&config.benchmark)?;
    let mut settings = config.generation_settings();
    if !args.conditions.is_empty() {
        settings = settings.with_conditions(args.conditions);
    }

    let start = std::time::Instant::now();
    let summary = GenerationRunner::new(provider, settings)
        .run(&tasks, &args.output)
        .await
        .with_context(|| format!("Generation into {} failed", args.output.display()))?;

    if summary.obtained < summary.requested {
        warn!(
            requested = summary.requested,
            obtained = summary.obtained,
            "Provider returned fewer completions than requested; re-run to fill the gaps"
        );
    }

    let output = GenerateOutput {
        provider: args.provider.to_string(),
        model,
        output: args.output,
        tasks: summary.tasks,
        requested: summary.requested,
        obtained: summary.obtained,
        skipped_groups: summary.skipped_groups,
        short_batches: summary.short_batches,
        total_duration_ms: start.elapsed().as_millis() as u64,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Generated {}/{} completions for {} tasks with {} -> {}",
            output.obtained,
            output.requested,
            output.tasks,
            output.model,
            output.output.display()
        );
    }
    Ok(())
}

// ============================================================================
// Merge
// ============================================================================

#[derive(Debug, Serialize)]
struct MergeOutput {
    output: PathBuf,
    unique: usize,
    duplicates: usize,
    malformed: usize,
    missing_inputs: Vec<PathBuf>,
}

fn run_merge_command(args: MergeArgs) -> anyhow::Result<()> {
    let report = merge_with_report(&args.output, &args.inputs)
        .with_context(|| format!("Failed to merge into {}", args.output.display()))?;

    let output = MergeOutput {
        output: args.output,
        unique: report.unique,
        duplicates: report.duplicates,
        malformed: report.malformed,
        missing_inputs: report.missing_inputs,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Merged {} unique records into {} ({} duplicates, {} malformed, {} missing inputs)",
            output.unique,
            output.output.display(),
            output.duplicates,
            output.malformed,
            output.missing_inputs.len()
        );
    }
    Ok(())
}

// ============================================================================
// Analyze
// ============================================================================

#[derive(Debug, Serialize)]
struct AnalyzeOutput {
    records: usize,
    cache: &'static str,
    evaluated: u64,
    duplicates_dropped: usize,
    similarity_backfilled: usize,
    pass_rates: Vec<PassRateRow>,
    files: Vec<PathBuf>,
}

impl From<&AnalysisReport> for AnalyzeOutput {
    fn from(report: &AnalysisReport) -> Self {
        Self {
            records: report.records,
            cache: report.cache_status,
            evaluated: report.evaluation.as_ref().map_or(0, |s| s.evaluated),
            duplicates_dropped: report.duplicates_dropped,
            similarity_backfilled: report.similarity_backfilled,
            pass_rates: report.pass_rates.clone(),
            files: report.files_written.clone(),
        }
    }
}

async fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let mut config = ExperimentConfig::from_env()?;
    if args.no_cache {
        config = config.with_cache(false);
    }
    if let Some(benchmark) = args.benchmark {
        config = config.with_benchmark(benchmark);
    }
    if args.max_workers.is_some() {
        config = config.with_max_workers(args.max_workers);
    }
    if let Some(timeout) = args.timeout {
        // Out-of-range values are rejected by validate().
        config.eval_timeout_secs = timeout;
    }
    if let Some(interpreter) = args.interpreter {
        config = config.with_interpreter(interpreter);
    }
    if let Some(alpha) = args.alpha {
        config = config.with_alpha(alpha);
    }
    if let Some(top_n) = args.top_n {
        config = config.with_top_n(top_n);
    }
    config.validate()?;

    let input = args.input.unwrap_or_else(|| config.merged_output.clone());
    let output_dir = args.output_dir.unwrap_or_else(|| config.analysis_dir.clone());

    let tasks = load_tasks(&config.benchmark)?;
    let evaluator = sandbox_evaluator(&config).await?;
    let report = Analyzer::new(tasks, evaluator, config.analysis_config())
        .run(&input, &output_dir)
        .await?;

    print_analysis(&report, args.json)
}

// ============================================================================
// Experiment
// ============================================================================

#[derive(Debug, Serialize)]
struct RunOutput {
    provider: String,
    model: String,
    output: PathBuf,
    obtained: Option<usize>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExperimentOutput {
    runs: Vec<RunOutput>,
    merged: usize,
    analysis: AnalyzeOutput,
}

async fn run_experiment_command(args: ExperimentArgs) -> anyhow::Result<()> {
    let mut config = ExperimentConfig::from_yaml_file(&args.config)?.with_env_overrides()?;
    if args.no_cache {
        config = config.with_cache(false);
    }
    config.validate()?;

    info!(
        config = %args.config.display(),
        runs = config.runs.len(),
        "Loaded experiment configuration"
    );

    let evaluator = sandbox_evaluator(&config).await?;
    let report = ExperimentRunner::new(config)
        .with_evaluator(evaluator)
        .run()
        .await?;

    if !args.json {
        for run in &report.runs {
            match (&run.summary, &run.error) {
                (Some(summary), _) => println!(
                    "{} {}: {} completions -> {}",
                    run.provider,
                    run.model,
                    summary.obtained,
                    run.output.display()
                ),
                (None, Some(error)) => println!("{} {}: FAILED ({})", run.provider, run.model, error),
                (None, None) => {}
            }
        }
        println!("Merged {} unique records", report.merge.unique);
        return print_analysis(&report.analysis, false);
    }

    let output = ExperimentOutput {
        runs: report
            .runs
            .iter()
            .map(|run| RunOutput {
                provider: run.provider.to_string(),
                model: run.model.clone(),
                output: run.output.clone(),
                obtained: run.summary.as_ref().map(|s| s.obtained),
                error: run.error.clone(),
            })
            .collect(),
        merged: report.merge.unique,
        analysis: AnalyzeOutput::from(&report.analysis),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_tasks(benchmark: &Path) -> anyhow::Result<TaskSet> {
    let tasks = TaskSet::load(&JsonlTaskSource::new(benchmark))
        .with_context(|| format!("Failed to load benchmark {}", benchmark.display()))?;
    info!(tasks = tasks.len(), benchmark = %benchmark.display(), "Benchmark loaded");
    Ok(tasks)
}

async fn sandbox_evaluator(config: &ExperimentConfig) -> anyhow::Result<Arc<dyn CodeEvaluator>> {
    let sandbox = Sandbox::new(config.sandbox_config());
    if !sandbox.is_available().await {
        anyhow::bail!(
            "Interpreter '{}' is not available; install it or pass --interpreter",
            config.interpreter
        );
    }
    info!(
        interpreter = %config.interpreter,
        timeout_ms = config.eval_timeout().as_millis() as u64,
        "Sandbox ready"
    );
    Ok(Arc::new(sandbox))
}

fn print_analysis(report: &AnalysisReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&AnalyzeOutput::from(report))?);
        return Ok(());
    }

    println!(
        "Analyzed {} records (cache: {}, similarity scored: {})",
        report.records, report.cache_status, report.similarity_backfilled
    );
    if report.duplicates_dropped > 0 {
        println!("Dropped {} repeated log records", report.duplicates_dropped);
    }
    println!("{:<40} {:<12} {:>10} {:>8}", "model", "condition", "pass@1", "samples");
    for row in &report.pass_rates {
        println!(
            "{:<40} {:<12} {:>10.4} {:>8}",
            row.model,
            row.condition.to_string(),
            row.pass_rate,
            row.samples
        );
    }
    for drift in &report.tables.drift {
        println!(
            "drift {} {}: {:+.4} ({:+.1}%)",
            drift.model, drift.condition, drift.absolute_drift, drift.relative_drift_pct
        );
    }
    if let Some(dir) = report.files_written.first().and_then(|p| p.parent()) {
        println!("Tables written to {}", dir.display());
    }
    Ok(())
}
