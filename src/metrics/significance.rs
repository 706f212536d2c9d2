//! Two-sided Mann–Whitney U test over per-task pass rates.
//!
//! Small samples without ties use the exact null distribution of U. Larger
//! or tied samples use the normal approximation with tie and continuity
//! corrections.

use std::collections::BTreeMap;

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use super::pass_rate::TaskRateRow;
use crate::corpus::CsvRow;
use crate::prompts::Condition;

/// Default significance level.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Exact distribution is used when either sample is at most this size.
const EXACT_MAX_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMethod {
    Exact,
    Asymptotic,
}

/// Result of a Mann–Whitney U test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MannWhitney {
    /// U statistic of the first sample.
    pub u_statistic: f64,
    pub p_value: f64,
    pub method: TestMethod,
}

/// Two-sided Mann–Whitney U test of `x` against `y`.
///
/// Returns `None` if either sample is empty. When every value is tied the
/// p-value is 1.0.
pub fn mann_whitney_u(x: &[f64], y: &[f64]) -> Option<MannWhitney> {
    let (n1, n2) = (x.len(), y.len());
    if n1 == 0 || n2 == 0 {
        return None;
    }

    let (ranks, tie_groups) = average_ranks(x.iter().chain(y.iter()).copied().collect());
    let rank_sum_x: f64 = ranks[..n1].iter().sum();
    let u1 = rank_sum_x - (n1 * (n1 + 1)) as f64 / 2.0;
    let u_max = u1.max((n1 * n2) as f64 - u1);

    let has_ties = tie_groups.iter().any(|&t| t > 1);
    if !has_ties && (n1 <= EXACT_MAX_SIZE || n2 <= EXACT_MAX_SIZE) {
        let p_value = (2.0 * exact_upper_tail(n1, n2, u_max.round() as usize)).min(1.0);
        return Some(MannWhitney {
            u_statistic: u1,
            p_value,
            method: TestMethod::Exact,
        });
    }

    let n = (n1 + n2) as f64;
    let tie_term: f64 = tie_groups
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum();
    let variance = (n1 * n2) as f64 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));

    let p_value = if variance <= 0.0 || !variance.is_finite() {
        1.0
    } else {
        let mean = (n1 * n2) as f64 / 2.0;
        let z = (u_max - mean - 0.5) / variance.sqrt();
        let normal = Normal::new(0.0, 1.0).ok()?;
        (2.0 * normal.sf(z)).min(1.0)
    };

    Some(MannWhitney {
        u_statistic: u1,
        p_value,
        method: TestMethod::Asymptotic,
    })
}

/// Average (1-based) ranks in input order, plus the size of each tie group.
fn average_ranks(values: Vec<f64>) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut tie_groups = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end share the mean of ranks start+1..=end.
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        tie_groups.push(end - start);
        start = end;
    }
    (ranks, tie_groups)
}

/// P(U >= u) under the null hypothesis, for samples of size `n1` and `n2`.
fn exact_upper_tail(n1: usize, n2: usize, u: usize) -> f64 {
    let max_u = n1 * n2;
    if u > max_u {
        return 0.0;
    }

    // U has the same null distribution for (n1, n2) and (n2, n1).
    let (small, large) = if n1 <= n2 { (n1, n2) } else { (n2, n1) };

    // prev[i][k]: orderings of i small-sample and j - 1 large-sample values
    // with U == k. The largest element is either from the small sample
    // (beating all j others) or from the large one.
    let mut prev: Vec<Vec<f64>> = vec![vec![1.0]; small + 1];
    for j in 1..=large {
        let mut row: Vec<Vec<f64>> = Vec::with_capacity(small + 1);
        row.push(vec![1.0]);
        for i in 1..=small {
            let mut dist = vec![0.0; i * j + 1];
            for (k, &c) in row[i - 1].iter().enumerate() {
                dist[k + j] += c;
            }
            for (k, &c) in prev[i].iter().enumerate() {
                dist[k] += c;
            }
            row.push(dist);
        }
        prev = row;
    }

    let dist = &prev[small];
    let total: f64 = dist.iter().sum();
    dist[u..].iter().sum::<f64>() / total
}

/// One neutral-versus-condition comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceRow {
    pub model: String,
    pub comparison: String,
    pub condition: Condition,
    /// U statistic of the neutral sample.
    pub u_stat: f64,
    pub p_value: f64,
    pub significant: bool,
    pub method: TestMethod,
    pub neutral_tasks: usize,
    pub condition_tasks: usize,
}

impl CsvRow for SignificanceRow {
    const COLUMNS: &'static [&'static str] = &[
        "model",
        "comparison",
        "condition",
        "u_stat",
        "p_value",
        "significant",
        "method",
        "neutral_tasks",
        "condition_tasks",
    ];
}

/// Mann–Whitney tests of neutral against each other condition, per model.
///
/// Comparisons where either side has no tasks are skipped.
pub fn significance_table(task_rates: &[TaskRateRow], alpha: f64) -> Vec<SignificanceRow> {
    let mut samples: BTreeMap<&str, BTreeMap<Condition, Vec<f64>>> = BTreeMap::new();
    for row in task_rates {
        samples
            .entry(row.model.as_str())
            .or_default()
            .entry(row.condition)
            .or_default()
            .push(row.task_pass_rate);
    }

    let mut rows = Vec::new();
    for (model, by_condition) in samples {
        let Some(neutral) = by_condition.get(&Condition::Neutral) else {
            continue;
        };
        for &condition in Condition::non_neutral() {
            let Some(treated) = by_condition.get(&condition) else {
                continue;
            };
            let Some(test) = mann_whitney_u(neutral, treated) else {
                continue;
            };
            rows.push(SignificanceRow {
                model: model.to_string(),
                comparison: format!("neutral vs {}", condition),
                condition,
                u_stat: test.u_statistic,
                p_value: test.p_value,
                significant: test.p_value < alpha,
                method: test.method,
                neutral_tasks: neutral.len(),
                condition_tasks: treated.len(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::super::pass_rate::per_task_rates;
    use super::super::pass_rate::test_support::group;
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_empty_sample() {
        assert!(mann_whitney_u(&[], &[1.0]).is_none());
        assert!(mann_whitney_u(&[1.0], &[]).is_none());
    }

    #[test]
    fn test_exact_complete_separation() {
        // U = 9, only 1 of C(6,3) = 20 orderings is this extreme.
        let result = mann_whitney_u(&[4.0, 5.0, 6.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(result.method, TestMethod::Exact);
        assert_eq!(result.u_statistic, 9.0);
        assert!(approx(result.p_value, 0.1, 1e-12));
    }

    #[test]
    fn test_exact_symmetric() {
        let a = mann_whitney_u(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(a.u_statistic, 0.0);
        assert!(approx(a.p_value, 0.1, 1e-12));
    }

    #[test]
    fn test_exact_interleaved_is_not_significant() {
        let result = mann_whitney_u(&[1.0, 4.0, 5.0], &[2.0, 3.0, 6.0]).unwrap();
        assert_eq!(result.u_statistic, 4.0);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_exact_when_one_sample_is_small() {
        // U = 60, 1 of C(23,3) = 1771 orderings in each tail.
        let x = [100.0, 101.0, 102.0];
        let y: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let result = mann_whitney_u(&x, &y).unwrap();
        assert_eq!(result.method, TestMethod::Exact);
        assert_eq!(result.u_statistic, 60.0);
        assert!(approx(result.p_value, 2.0 / 1771.0, 1e-12));

        let swapped = mann_whitney_u(&y, &x).unwrap();
        assert_eq!(swapped.method, TestMethod::Exact);
        assert!(approx(swapped.p_value, result.p_value, 1e-12));
    }

    #[test]
    fn test_two_large_untied_samples_are_asymptotic() {
        let x: Vec<f64> = (0..9).map(|i| 2.0 * i as f64).collect();
        let y: Vec<f64> = (0..9).map(|i| 2.0 * i as f64 + 1.0).collect();
        assert_eq!(mann_whitney_u(&x, &y).unwrap().method, TestMethod::Asymptotic);
    }

    #[test]
    fn test_asymptotic_with_ties() {
        let x = [1.0, 1.0, 1.0, 1.0, 0.0];
        let y = [0.0, 0.0, 0.0, 0.0, 1.0];
        let result = mann_whitney_u(&x, &y).unwrap();
        assert_eq!(result.method, TestMethod::Asymptotic);
        // Ranks: five zeros share 3.0, five ones share 8.0.
        assert_eq!(result.u_statistic, 4.0 * 8.0 + 3.0 - 15.0);
        assert!(result.p_value > 0.0 && result.p_value < 1.0);
    }

    #[test]
    fn test_all_tied_gives_p_one() {
        let result = mann_whitney_u(&[1.0; 10], &[1.0; 12]).unwrap();
        assert_eq!(result.p_value, 1.0);
        assert_eq!(result.u_statistic, 60.0);
    }

    #[test]
    fn test_large_separated_samples_are_significant() {
        let x: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let y: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let result = mann_whitney_u(&x, &y).unwrap();
        assert_eq!(result.method, TestMethod::Asymptotic);
        assert!(result.p_value < 1e-6);
    }

    #[test]
    fn test_average_ranks() {
        let (ranks, ties) = average_ranks(vec![10.0, 20.0, 10.0, 30.0]);
        assert_eq!(ranks, vec![1.5, 3.0, 1.5, 4.0]);
        assert_eq!(ties, vec![2, 1, 1]);
    }

    #[test]
    fn test_significance_table_per_model() {
        let mut records = Vec::new();
        for t in 0..10 {
            let task = format!("T/{}", t);
            records.extend(group("a", Condition::Neutral, &task, 4, 4));
            records.extend(group("a", Condition::Speed, &task, 0, 4));
            records.extend(group("a", Condition::Caution, &task, 4, 4));
        }
        records.extend(group("b", Condition::Speed, "T/0", 1, 1));

        let rows = significance_table(&per_task_rates(&records), DEFAULT_ALPHA);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].comparison, "neutral vs speed");
        assert!(rows[0].significant);
        assert_eq!(rows[1].condition, Condition::Caution);
        assert_eq!(rows[1].p_value, 1.0);
        assert!(!rows[1].significant);
    }
}
