//! All analysis tables computed from one evaluated corpus.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::drift::{
    drift_table, reliability_table, top_drifted_tasks, DriftRow, ReliabilityRow, TaskDriftRow,
    DEFAULT_TOP_N,
};
use super::pass_rate::{pass_rates, per_task_rates, PassRateRow, TaskRateRow};
use super::significance::{significance_table, SignificanceRow, DEFAULT_ALPHA};
use crate::corpus::{CsvRow, EvaluationRecord};
use crate::error::StorageError;
use crate::prompts::Condition;

/// Knobs for metric computation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Significance level for the Mann–Whitney tests.
    pub alpha: f64,
    /// Rows kept per (model, condition) in the drift ranking.
    pub top_n: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Mean similarity to the canonical solution per (model, condition).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityRow {
    pub model: String,
    pub condition: Condition,
    pub codebleu: f64,
    pub scored: usize,
}

impl CsvRow for SimilarityRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "codebleu",
        "scored",
    ];
}

/// Mean completion length per (model, condition).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeLengthRow {
    pub model: String,
    pub condition: Condition,
    pub mean_code_length: f64,
    pub samples: usize,
}

impl CsvRow for CodeLengthRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "mean_code_length",
        "samples",
    ];
}

/// Derived tables. Recomputed from the corpus on every analysis and never
/// read back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsTables {
    pub pass_rates: Vec<PassRateRow>,
    pub per_task: Vec<TaskRateRow>,
    pub drift: Vec<DriftRow>,
    pub reliability: Vec<ReliabilityRow>,
    pub significance: Vec<SignificanceRow>,
    pub top_drifted: Vec<TaskDriftRow>,
    pub codebleu: Vec<SimilarityRow>,
    pub code_length: Vec<CodeLengthRow>,
}

impl MetricsTables {
    pub fn compute(records: &[EvaluationRecord], config: &MetricsConfig) -> Self {
        let pass_rates = pass_rates(records);
        let per_task = per_task_rates(records);

        let tables = Self {
            drift: drift_table(&pass_rates),
            reliability: reliability_table(&per_task),
            significance: significance_table(&per_task, config.alpha),
            top_drifted: top_drifted_tasks(&per_task, config.top_n),
            codebleu: similarity_means(records),
            code_length: code_length_means(records),
            pass_rates,
            per_task,
        };

        debug!(
            records = records.len(),
            groups = tables.pass_rates.len(),
            tasks = tables.per_task.len(),
            comparisons = tables.significance.len(),
            "Metrics computed"
        );
        tables
    }

    /// Writes every table as CSV into `dir`, returning the files written.
    pub fn write_csv(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

        let written = vec![
            write_table(dir, "pass_rates_summary.csv", &self.pass_rates)?,
            write_table(dir, "per_task_breakdown.csv", &self.per_task)?,
            write_table(dir, "drift_analysis.csv", &self.drift)?,
            write_table(dir, "reliability_scores.csv", &self.reliability)?,
            write_table(dir, "statistical_significance.csv", &self.significance)?,
            write_table(dir, "top_drifted_tasks.csv", &self.top_drifted)?,
            write_table(dir, "codebleu_scores.csv", &self.codebleu)?,
            write_table(dir, "code_length_summary.csv", &self.code_length)?,
        ];

        info!(dir = %dir.display(), files = written.len(), "Metrics tables written");
        Ok(written)
    }
}

fn write_table<T: Serialize + CsvRow>(
    dir: &Path,
    name: &str,
    rows: &[T],
) -> Result<PathBuf, StorageError> {
    let path = dir.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    if rows.is_empty() {
        writer.write_record(T::COLUMNS)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| StorageError::io(&path, e))?;
    Ok(path)
}

fn similarity_means(records: &[EvaluationRecord]) -> Vec<SimilarityRow> {
    let mut groups: BTreeMap<(&str, Condition), (f64, usize)> = BTreeMap::new();
    for record in records {
        if let Some(score) = record.codebleu {
            let entry = groups
                .entry((record.model.as_str(), record.condition))
                .or_default();
            entry.0 += score;
            entry.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|((model, condition), (sum, scored))| SimilarityRow {
            model: model.to_string(),
            condition,
            codebleu: sum / scored as f64,
            scored,
        })
        .collect()
}

fn code_length_means(records: &[EvaluationRecord]) -> Vec<CodeLengthRow> {
    let mut groups: BTreeMap<(&str, Condition), (usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = groups
            .entry((record.model.as_str(), record.condition))
            .or_default();
        entry.0 += record.code_length;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((model, condition), (total, samples))| CodeLengthRow {
            model: model.to_string(),
            condition,
            mean_code_length: total as f64 / samples as f64,
            samples,
        })
        .collect()
}
