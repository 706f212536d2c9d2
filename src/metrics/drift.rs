//! Drift, reliability and per-task drift ranking.
//!
//! Drift is the drop in pass rate from the neutral baseline to a treatment
//! condition. Positive drift means the condition hurt correctness.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use super::pass_rate::{PassRateRow, TaskRateRow};
use crate::corpus::CsvRow;
use crate::prompts::Condition;

/// Default number of rows kept per (model, condition) in the drift ranking.
pub const DEFAULT_TOP_N: usize = 20;

/// Absolute and relative drift from `neutral` to `condition`.
///
/// Relative drift is a percentage of the neutral rate, and 0 when the
/// neutral rate is 0.
pub fn goal_drift(neutral: f64, condition: f64) -> (f64, f64) {
    let absolute = neutral - condition;
    let relative = if neutral > 0.0 {
        absolute / neutral * 100.0
    } else {
        0.0
    };
    (absolute, relative)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftRow {
    pub model: String,
    pub condition: Condition,
    pub neutral_rate: f64,
    pub condition_rate: f64,
    pub absolute_drift: f64,
    pub relative_drift_pct: f64,
}

impl CsvRow for DriftRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "neutral_rate",
        "condition_rate",
        "absolute_drift",
        "relative_drift_pct",
    ];
}

/// Drift of every non-neutral condition per model.
///
/// Models without a neutral rate are skipped.
pub fn drift_table(rates: &[PassRateRow]) -> Vec<DriftRow> {
    let mut by_model: BTreeMap<&str, HashMap<Condition, f64>> = BTreeMap::new();
    for row in rates {
        by_model
            .entry(row.model.as_str())
            .or_default()
            .insert(row.condition, row.pass_rate);
    }

    let mut rows = Vec::new();
    for (model, conditions) in by_model {
        let Some(&neutral) = conditions.get(&Condition::Neutral) else {
            warn!(model, "No neutral pass rate, skipping drift");
            continue;
        };
        for &condition in Condition::non_neutral() {
            let Some(&rate) = conditions.get(&condition) else {
                debug!(model, condition = %condition, "Condition not sampled");
                continue;
            };
            let (absolute_drift, relative_drift_pct) = goal_drift(neutral, rate);
            rows.push(DriftRow {
                model: model.to_string(),
                condition,
                neutral_rate: neutral,
                condition_rate: rate,
                absolute_drift,
                relative_drift_pct,
            });
        }
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityRow {
    pub model: String,
    pub condition: Condition,
    /// Tasks solved by every sample.
    pub perfect_count: usize,
    pub total_tasks: usize,
    pub reliability_score: f64,
}

impl CsvRow for ReliabilityRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "perfect_count",
        "total_tasks",
        "reliability_score",
    ];
}

/// Share of the corpus' distinct tasks solved by every sample, per group.
///
/// Every (model, condition) group present in `task_rates` gets a row, even
/// when it has no perfect task.
pub fn reliability_table(task_rates: &[TaskRateRow]) -> Vec<ReliabilityRow> {
    let total_tasks = task_rates
        .iter()
        .map(|r| r.task_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let mut perfect: BTreeMap<(&str, Condition), usize> = BTreeMap::new();
    for row in task_rates {
        *perfect
            .entry((row.model.as_str(), row.condition))
            .or_default() += (row.task_pass_rate == 1.0) as usize;
    }

    perfect
        .into_iter()
        .map(|((model, condition), perfect_count)| ReliabilityRow {
            model: model.to_string(),
            condition,
            perfect_count,
            total_tasks,
            reliability_score: if total_tasks == 0 {
                0.0
            } else {
                perfect_count as f64 / total_tasks as f64
            },
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDriftRow {
    pub model: String,
    pub condition: Condition,
    pub task_id: String,
    pub neutral_rate: f64,
    pub condition_rate: f64,
    pub drift: f64,
}

impl CsvRow for TaskDriftRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "task_id",
        "neutral_rate",
        "condition_rate",
        "drift",
    ];
}

/// The `top_n` tasks with the largest drift, per model and non-neutral condition.
///
/// Only tasks sampled under both neutral and the condition are ranked. Ties
/// keep task id order.
pub fn top_drifted_tasks(task_rates: &[TaskRateRow], top_n: usize) -> Vec<TaskDriftRow> {
    let mut rates: BTreeMap<(&str, Condition), BTreeMap<&str, f64>> = BTreeMap::new();
    for row in task_rates {
        rates
            .entry((row.model.as_str(), row.condition))
            .or_default()
            .insert(row.task_id.as_str(), row.task_pass_rate);
    }

    let models: BTreeSet<&str> = rates.keys().map(|(model, _)| *model).collect();
    let mut out = Vec::new();

    for model in models {
        let Some(neutral) = rates.get(&(model, Condition::Neutral)) else {
            continue;
        };
        for &condition in Condition::non_neutral() {
            let Some(treated) = rates.get(&(model, condition)) else {
                continue;
            };

            let mut ranked: Vec<TaskDriftRow> = neutral
                .iter()
                .filter_map(|(&task_id, &neutral_rate)| {
                    let condition_rate = *treated.get(task_id)?;
                    Some(TaskDriftRow {
                        model: model.to_string(),
                        condition,
                        task_id: task_id.to_string(),
                        neutral_rate,
                        condition_rate,
                        drift: neutral_rate - condition_rate,
                    })
                })
                .collect();

            // Stable sort keeps task id order among equal drifts.
            ranked.sort_by(|a, b| b.drift.total_cmp(&a.drift));
            ranked.truncate(top_n);
            out.extend(ranked);
        }
    }
    out
}
