//! Pass-rate estimators and grouped pass rates.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::corpus::{CsvRow, EvaluationRecord};
use crate::prompts::Condition;

/// Fraction of records that passed. Empty input yields 0.0.
pub fn pass_at_1(records: &[EvaluationRecord]) -> f64 {
    mean_passed(records.iter().map(|r| r.passed))
}

/// Unbiased pass@k estimate from `n` samples with `c` correct.
///
/// Computes `1 - C(n-c, k) / C(n, k)` as a running product to stay stable
/// for large `n`.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> f64 {
    if n == 0 || k == 0 {
        return 0.0;
    }
    let c = c.min(n);
    if n - c < k {
        return 1.0;
    }
    let mut all_fail = 1.0;
    for i in (n - c + 1)..=n {
        all_fail *= 1.0 - k as f64 / i as f64;
    }
    1.0 - all_fail
}

fn mean_passed(outcomes: impl Iterator<Item = bool>) -> f64 {
    let (passed, total) = outcomes.fold((0usize, 0usize), |(p, t), ok| (p + ok as usize, t + 1));
    if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64
    }
}

/// Pass rate of one (model, condition) group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassRateRow {
    pub model: String,
    pub condition: Condition,
    pub pass_rate: f64,
    pub samples: usize,
}

impl CsvRow for PassRateRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "pass_rate",
        "samples",
    ];
}

/// Pass rate of one (model, condition, task) group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRateRow {
    pub model: String,
    pub condition: Condition,
    pub task_id: String,
    pub task_pass_rate: f64,
    pub samples: usize,
}

impl CsvRow for TaskRateRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "condition",
        "task_id",
        "task_pass_rate",
        "samples",
    ];
}

#[derive(Default)]
struct Tally {
    passed: usize,
    total: usize,
}

impl Tally {
    fn add(&mut self, passed: bool) {
        self.passed += passed as usize;
        self.total += 1;
    }

    fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

/// Pass rate per (model, condition), ordered by model then condition.
pub fn pass_rates(records: &[EvaluationRecord]) -> Vec<PassRateRow> {
    let mut groups: BTreeMap<(&str, Condition), Tally> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.model.as_str(), record.condition))
            .or_default()
            .add(record.passed);
    }

    groups
        .into_iter()
        .map(|((model, condition), tally)| PassRateRow {
            model: model.to_string(),
            condition,
            pass_rate: tally.rate(),
            samples: tally.total,
        })
        .collect()
}

/// Pass rate per (model, condition, task), ordered by model, condition, task.
pub fn per_task_rates(records: &[EvaluationRecord]) -> Vec<TaskRateRow> {
    let mut groups: BTreeMap<(&str, Condition, &str), Tally> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.model.as_str(), record.condition, record.task_id.as_str()))
            .or_default()
            .add(record.passed);
    }

    groups
        .into_iter()
        .map(|((model, condition, task_id), tally)| TaskRateRow {
            model: model.to_string(),
            condition,
            task_id: task_id.to_string(),
            task_pass_rate: tally.rate(),
            samples: tally.total,
        })
        .collect()
}
