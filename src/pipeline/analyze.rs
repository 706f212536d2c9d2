//! Analysis of a generation log: evaluate, score, tabulate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::benchmark::TaskSet;
use crate::corpus::{CacheLookup, EvaluationRecord, GenerationRecord, ResultCache, SourceFingerprint};
use crate::evaluation::{extract_code, CodeEvaluator, EvalJob, EvaluationPool, PoolConfig, PoolStats};
use crate::generation::GenerationLog;
use crate::metrics::{codebleu_proxy, MetricsConfig, MetricsTables, PassRateRow};

/// Settings for one analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
    /// Reuse a matching evaluated-corpus cache.
    pub use_cache: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            metrics: MetricsConfig::default(),
            use_cache: true,
        }
    }
}

/// Outcome of [`Analyzer::run`].
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Records in the evaluated corpus.
    pub records: usize,
    /// `"hit"`, `"miss"` or `"stale"`.
    pub cache_status: &'static str,
    /// Statistics of fresh evaluations; `None` on a cache hit.
    pub evaluation: Option<PoolStats>,
    /// Log lines dropped because an earlier line had the same identity key.
    pub duplicates_dropped: usize,
    /// Records whose similarity score was computed in this run.
    pub similarity_backfilled: usize,
    pub pass_rates: Vec<PassRateRow>,
    pub tables: MetricsTables,
    pub files_written: Vec<PathBuf>,
}

/// Evaluates a generation log against its benchmark and writes metric tables.
pub struct Analyzer {
    tasks: TaskSet,
    evaluator: Arc<dyn CodeEvaluator>,
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(tasks: TaskSet, evaluator: Arc<dyn CodeEvaluator>, config: AnalysisConfig) -> Self {
        Self {
            tasks,
            evaluator,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyzes `input_log`, writing the corpus cache and tables to `output_dir`.
    pub async fn run(&self, input_log: &Path, output_dir: &Path) -> Result<AnalysisReport> {
        let start = Instant::now();
        let bytes = tokio::fs::read(input_log)
            .await
            .with_context(|| format!("Failed to read generation log {}", input_log.display()))?;
        let content = String::from_utf8_lossy(&bytes);
        let generations = GenerationLog::parse(input_log, &content)
            .with_context(|| format!("Failed to parse generation log {}", input_log.display()))?;
        let (generations, duplicates_dropped) = dedup_first_wins(generations);
        if duplicates_dropped > 0 {
            warn!(
                log = %input_log.display(),
                dropped = duplicates_dropped,
                "Generation log repeats identity keys, keeping the first of each"
            );
        }
        let fingerprint = SourceFingerprint::from_bytes(&bytes, generations.len());

        info!(
            log = %input_log.display(),
            records = generations.len(),
            output = %output_dir.display(),
            "Starting analysis"
        );

        let cache = ResultCache::for_output_dir(output_dir);
        let lookup = if self.config.use_cache {
            cache.load(&fingerprint)
        } else {
            CacheLookup::Miss("cache disabled".to_string())
        };
        let cache_status = lookup.status();

        let (mut records, evaluation) = match lookup {
            CacheLookup::Hit(records) => {
                info!(records = records.len(), "Reusing evaluated corpus");
                (records, None)
            }
            CacheLookup::Miss(reason) | CacheLookup::Stale(reason) => {
                info!(status = cache_status, reason = %reason, "Evaluating generation log");
                let (records, stats) = self.evaluate(generations).await?;
                (records, Some(stats))
            }
        };

        let similarity_backfilled = backfill_similarity(&mut records);
        if evaluation.is_some() || similarity_backfilled > 0 {
            cache
                .store(&records, &fingerprint)
                .context("Failed to store evaluated corpus")?;
        }

        let tables = MetricsTables::compute(&records, &self.config.metrics);
        let files_written = tables
            .write_csv(output_dir)
            .context("Failed to write metric tables")?;

        info!(
            records = records.len(),
            cache = cache_status,
            backfilled = similarity_backfilled,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(AnalysisReport {
            records: records.len(),
            cache_status,
            evaluation,
            duplicates_dropped,
            similarity_backfilled,
            pass_rates: tables.pass_rates.clone(),
            tables,
            files_written,
        })
    }

    /// Executes every generation against its task's tests.
    ///
    /// Fails before running anything if a record names an unknown task.
    async fn evaluate(
        &self,
        generations: Vec<GenerationRecord>,
    ) -> Result<(Vec<EvaluationRecord>, PoolStats)> {
        let mut jobs = Vec::with_capacity(generations.len());
        for record in &generations {
            let task = self
                .tasks
                .get(&record.task_id)
                .with_context(|| format!("Record for {} cannot be evaluated", record.task_id))?;
            jobs.push(EvalJob {
                task_id: record.task_id.clone(),
                prompt: record.prompt.clone(),
                completion: record.completion.clone(),
                test: task.test.clone(),
                entry_point: task.entry_point.clone(),
            });
        }

        let pool = EvaluationPool::new(Arc::clone(&self.evaluator), self.config.pool.clone());
        let verdicts = pool.evaluate_all(jobs).await;
        let stats = pool.stats();

        if stats.crashed > 0 {
            warn!(crashed = stats.crashed, "Some evaluations crashed");
        }

        let records = generations
            .into_iter()
            .zip(verdicts)
            .map(|(record, verdict)| EvaluationRecord::from_generation(record, verdict))
            .collect();
        Ok((records, stats))
    }
}

/// Keeps the first record of each identity key, in log order.
fn dedup_first_wins(generations: Vec<GenerationRecord>) -> (Vec<GenerationRecord>, usize) {
    let total = generations.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<_> = generations
        .into_iter()
        .filter(|record| seen.insert(record.key()))
        .collect();
    let dropped = total - unique.len();
    (unique, dropped)
}

/// Scores records that have no similarity value yet. Returns how many were scored.
fn backfill_similarity(records: &mut [EvaluationRecord]) -> usize {
    let mut scored = 0;
    for record in records.iter_mut().filter(|r| r.codebleu.is_none()) {
        let candidate = extract_code(&record.completion);
        record.codebleu = Some(codebleu_proxy(&record.canonical_solution, &candidate));
        scored += 1;
    }
    if scored > 0 {
        debug!(scored, "Similarity scores computed");
    }
    scored
}
