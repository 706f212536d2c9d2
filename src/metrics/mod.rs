//! Metrics over an evaluated corpus.
//!
//! Pass rates, goal drift, reliability, significance tests and a token-BLEU
//! similarity proxy. [`MetricsTables`] bundles every table and writes them as
//! CSV files.

pub mod drift;
pub mod pass_rate;
pub mod significance;
pub mod similarity;
pub mod tables;

pub use drift::{
    drift_table, goal_drift, reliability_table, top_drifted_tasks, DriftRow, ReliabilityRow,
    TaskDriftRow, DEFAULT_TOP_N,
};
pub use pass_rate::{pass_at_1, pass_at_k, pass_rates, per_task_rates, PassRateRow, TaskRateRow};
pub use significance::{
    mann_whitney_u, significance_table, MannWhitney, SignificanceRow, TestMethod, DEFAULT_ALPHA,
};
pub use similarity::{codebleu_proxy, sentence_bleu, tokenize};
pub use tables::{CodeLengthRow, MetricsConfig, MetricsTables, SimilarityRow};
