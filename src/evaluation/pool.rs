//! Bounded parallel evaluation.
//!
//! Each job runs as its own spawned task, at most `max_workers` at a time.
//! Results are tagged with their input index and returned in input order.
//! A worker task that panics is contained and recorded as a failed verdict.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use super::job::{CodeEvaluator, EvalJob, Verdict};

/// Default number of evaluations between progress log lines.
const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// Configuration for the evaluation pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum evaluations in flight.
    pub max_workers: usize,
    /// Log progress every N finished evaluations. 0 disables it.
    pub progress_interval: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl PoolConfig {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Statistics about evaluations run through a pool.
///
/// `failed` counts every non-passing verdict; `timed_out` and `crashed` are
/// subsets of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub evaluated: u64,
    pub passed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub crashed: u64,
    pub average_duration: Duration,
}

impl PoolStats {
    /// Pass rate as a percentage.
    pub fn pass_rate(&self) -> f64 {
        if self.evaluated == 0 {
            return 0.0;
        }
        (self.passed as f64 / self.evaluated as f64) * 100.0
    }
}

struct SharedPoolStats {
    evaluated: AtomicU64,
    passed: AtomicU64,
    timed_out: AtomicU64,
    crashed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            evaluated: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            crashed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    /// Records one verdict, returning the running total.
    fn record(&self, verdict: &Verdict, duration: Duration) -> u64 {
        if verdict.passed {
            self.passed.fetch_add(1, Ordering::SeqCst);
        } else if verdict.is_timeout() {
            self.timed_out.fetch_add(1, Ordering::SeqCst);
        } else if verdict.is_crash() {
            self.crashed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.evaluated.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn to_pool_stats(&self) -> PoolStats {
        let evaluated = self.evaluated.load(Ordering::SeqCst);
        let passed = self.passed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let average_duration = if evaluated > 0 {
            Duration::from_millis(total_duration_ms / evaluated)
        } else {
            Duration::ZERO
        };

        PoolStats {
            evaluated,
            passed,
            failed: evaluated - passed,
            timed_out: self.timed_out.load(Ordering::SeqCst),
            crashed: self.crashed.load(Ordering::SeqCst),
            average_duration,
        }
    }
}

/// Runs evaluation jobs with bounded concurrency.
pub struct EvaluationPool {
    evaluator: Arc<dyn CodeEvaluator>,
    config: PoolConfig,
    stats: Arc<SharedPoolStats>,
}

impl EvaluationPool {
    pub fn new(evaluator: Arc<dyn CodeEvaluator>, config: PoolConfig) -> Self {
        Self {
            evaluator,
            config,
            stats: Arc::new(SharedPoolStats::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Statistics accumulated over every call on this pool.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats()
    }

    /// Evaluates every job; the output has one verdict per job, in input order.
    pub async fn evaluate_all(&self, jobs: Vec<EvalJob>) -> Vec<Verdict> {
        let total = jobs.len();
        let workers = self.config.max_workers.max(1);
        let interval = self.config.progress_interval;
        let start = Instant::now();

        info!(jobs = total, workers, "Starting evaluation");

        let mut tagged: Vec<(usize, Verdict)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(idx, job)| {
                let evaluator = Arc::clone(&self.evaluator);
                let stats = Arc::clone(&self.stats);
                async move {
                    let started = Instant::now();
                    let task_id = job.task_id.clone();
                    let handle = tokio::spawn(async move { evaluator.evaluate(&job).await });

                    let verdict = match handle.await {
                        Ok(verdict) => verdict,
                        Err(join_err) => {
                            let reason = crash_reason(join_err);
                            error!(task_id = %task_id, index = idx, reason = %reason, "Evaluation worker crashed");
                            Verdict::crashed(reason)
                        }
                    };

                    let done = stats.record(&verdict, started.elapsed());
                    if interval > 0 && done % interval == 0 {
                        info!(done, total, "Evaluation progress");
                    }
                    (idx, verdict)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        tagged.sort_by_key(|(idx, _)| *idx);

        let stats = self.stats();
        info!(
            evaluated = total,
            passed = stats.passed,
            timed_out = stats.timed_out,
            crashed = stats.crashed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Evaluation complete"
        );

        tagged.into_iter().map(|(_, verdict)| verdict).collect()
    }
}

fn crash_reason(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                msg.to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "panic".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Passes jobs whose completion is "ok", panics on "panic", sleeps on
    /// "slow" so completions finish out of order.
    struct ScriptedEvaluator;

    #[async_trait]
    impl CodeEvaluator for ScriptedEvaluator {
        async fn evaluate(&self, job: &EvalJob) -> Verdict {
            match job.completion.as_str() {
                "ok" => Verdict::passed(),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Verdict::passed()
                }
                "timeout" => Verdict::timed_out(),
                "panic" => panic!("evaluator exploded"),
                other => Verdict::failed(other),
            }
        }
    }

    fn job(id: usize, completion: &str) -> EvalJob {
        EvalJob {
            task_id: format!("T/{}", id),
            prompt: String::new(),
            completion: completion.to_string(),
            test: String::new(),
            entry_point: "f".to_string(),
        }
    }

    fn pool(workers: usize) -> EvaluationPool {
        EvaluationPool::new(Arc::new(ScriptedEvaluator), PoolConfig::new(workers))
    }

    #[test]
    fn test_default_config_uses_hardware_parallelism() {
        assert!(PoolConfig::default().max_workers >= 1);
    }

    #[tokio::test]
    async fn test_preserves_input_order() {
        let jobs = vec![job(0, "slow"), job(1, "bad"), job(2, "ok"), job(3, "slow")];
        let verdicts = pool(4).evaluate_all(jobs).await;

        assert_eq!(verdicts.len(), 4);
        assert!(verdicts[0].passed);
        assert_eq!(verdicts[1].detail, "failed: bad");
        assert!(verdicts[2].passed);
        assert!(verdicts[3].passed);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let jobs = vec![job(0, "ok"), job(1, "panic"), job(2, "ok")];
        let pool = pool(2);
        let verdicts = pool.evaluate_all(jobs).await;

        assert!(verdicts[0].passed);
        assert!(!verdicts[1].passed);
        assert!(verdicts[1].is_crash());
        assert!(verdicts[1].detail.contains("evaluator exploded"));
        assert!(verdicts[2].passed);
        assert_eq!(pool.stats().crashed, 1);
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let pool = pool(1);
        pool.evaluate_all(vec![job(0, "ok"), job(1, "timeout"), job(2, "nope")])
            .await;

        let stats = pool.stats();
        assert_eq!(stats.evaluated, 3);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.crashed, 0);
        assert!((stats.pass_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_input() {
        assert!(pool(2).evaluate_all(Vec::new()).await.is_empty());
        assert_eq!(PoolStats::default().pass_rate(), 0.0);
    }
}
