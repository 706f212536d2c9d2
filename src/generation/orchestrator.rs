//! Generation orchestrator.
//!
//! Walks every task (benchmark order) and every condition (fixed order),
//! asks the provider for the missing samples, and appends each completion
//! to the generation log as soon as it arrives.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::benchmark::TaskSet;
use crate::corpus::GenerationRecord;
use crate::error::StorageError;
use crate::generation::log::{GenerationLog, GroupProgress};
use crate::llm::CompletionProvider;
use crate::prompts::{apply_condition, Condition};

/// Default samples per (task, condition).
pub const DEFAULT_ITERATIONS: usize = 10;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Settings for one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    /// Samples per (task, condition).
    pub iterations: usize,
    pub temperature: f64,
    /// Restrict to the first N tasks.
    pub limit: Option<usize>,
    /// Conditions to sample, in order.
    pub conditions: Vec<Condition>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            temperature: DEFAULT_TEMPERATURE,
            limit: None,
            conditions: Condition::all().to_vec(),
        }
    }
}

impl GenerationSettings {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }
}

/// Outcome counters of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Tasks visited.
    pub tasks: usize,
    /// Completions requested from the provider.
    pub requested: usize,
    /// Completions received and logged.
    pub obtained: usize,
    /// Groups already complete in the log.
    pub skipped_groups: usize,
    /// Provider calls that returned fewer completions than requested.
    pub short_batches: usize,
}

/// Drives a provider over the benchmark and writes the generation log.
pub struct GenerationRunner {
    provider: Arc<dyn CompletionProvider>,
    settings: GenerationSettings,
}

impl GenerationRunner {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Runs generation, resuming from whatever `log_path` already holds.
    pub async fn run(
        &self,
        tasks: &TaskSet,
        log_path: &Path,
    ) -> Result<GenerationSummary, StorageError> {
        let model = self.provider.model().to_string();
        let existing = GenerationLog::existing_counts(log_path, &model)?;
        let mut log = GenerationLog::open(log_path)?;
        let selected = tasks.head(self.settings.limit);
        let start = Instant::now();

        info!(
            provider = self.provider.name(),
            model = %model,
            tasks = selected.len(),
            conditions = self.settings.conditions.len(),
            iterations = self.settings.iterations,
            resumed_groups = existing.len(),
            log = %log_path.display(),
            "Starting generation run"
        );

        let mut summary = GenerationSummary::default();

        for task in selected {
            summary.tasks += 1;

            for &condition in &self.settings.conditions {
                let progress = existing
                    .get(&(task.task_id.clone(), condition))
                    .copied()
                    .unwrap_or(GroupProgress {
                        count: 0,
                        next_iteration: 0,
                    });

                let missing = self.settings.iterations.saturating_sub(progress.count);
                if missing == 0 {
                    summary.skipped_groups += 1;
                    debug!(task_id = %task.task_id, condition = %condition, "Group complete, skipping");
                    continue;
                }

                let prompt = apply_condition(&task.prompt, condition);
                summary.requested += missing;
                let completions = self
                    .provider
                    .generate(&prompt, missing, self.settings.temperature)
                    .await;

                if completions.len() < missing {
                    summary.short_batches += 1;
                    warn!(
                        task_id = %task.task_id,
                        condition = %condition,
                        requested = missing,
                        received = completions.len(),
                        "Provider returned fewer completions than requested"
                    );
                }

                for (offset, completion) in completions.into_iter().take(missing).enumerate() {
                    let record = GenerationRecord {
                        task_id: task.task_id.clone(),
                        condition,
                        iteration: progress.next_iteration + offset as u32,
                        prompt: prompt.clone(),
                        completion,
                        model: model.clone(),
                        canonical_solution: task.canonical_solution.clone(),
                        entry_point: task.entry_point.clone(),
                    };
                    log.append(&record)?;
                    summary.obtained += 1;
                }
            }

            debug!(task_id = %task.task_id, obtained = summary.obtained, "Task done");
        }

        info!(
            model = %model,
            tasks = summary.tasks,
            requested = summary.requested,
            obtained = summary.obtained,
            skipped_groups = summary.skipped_groups,
            short_batches = summary.short_batches,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generation run complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::Task;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct EchoProvider {
        calls: AtomicUsize,
        cap: Option<usize>,
    }

    impl EchoProvider {
        fn new(cap: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cap,
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn generate(&self, prompt: &str, n: usize, _temperature: f64) -> Vec<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = self.cap.map_or(n, |cap| n.min(cap));
            (0..n).map(|i| format!("{}#{}", prompt.len(), i)).collect()
        }
    }

    fn tasks(count: usize) -> TaskSet {
        TaskSet::new(
            (0..count)
                .map(|i| Task {
                    task_id: format!("T/{}", i),
                    prompt: format!("def f{}():\n", i),
                    entry_point: format!("f{}", i),
                    canonical_solution: "    return 1\n".to_string(),
                    test: "def check(candidate):\n    pass\n".to_string(),
                })
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_generates_every_group() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.jsonl");
        let provider = Arc::new(EchoProvider::new(None));
        let runner = GenerationRunner::new(
            provider.clone(),
            GenerationSettings::default().with_iterations(3),
        );

        let summary = runner.run(&tasks(2), &path).await.unwrap();
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.requested, 24);
        assert_eq!(summary.obtained, 24);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 8);

        let records = GenerationLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 24);
        // Task order then fixed condition order.
        assert_eq!(records[0].task_id, "T/0");
        assert_eq!(records[0].condition, Condition::Neutral);
        assert_eq!(records[3].condition, Condition::Speed);
        assert_eq!(records[12].task_id, "T/1");
        assert_eq!(
            records.iter().take(3).map(|r| r.iteration).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(records[3].prompt.contains("# IMPORTANT"));
        assert_eq!(records[0].prompt, "def f0():\n");
    }

    #[tokio::test]
    async fn test_limit_restricts_tasks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.jsonl");
        let runner = GenerationRunner::new(
            Arc::new(EchoProvider::new(None)),
            GenerationSettings::default()
                .with_iterations(1)
                .with_limit(Some(1)),
        );

        let summary = runner.run(&tasks(5), &path).await.unwrap();
        assert_eq!(summary.tasks, 1);
        assert_eq!(summary.obtained, 4);
    }

    #[tokio::test]
    async fn test_short_batches_are_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.jsonl");
        let runner = GenerationRunner::new(
            Arc::new(EchoProvider::new(Some(2))),
            GenerationSettings::default().with_iterations(3),
        );

        let summary = runner.run(&tasks(1), &path).await.unwrap();
        assert_eq!(summary.requested, 12);
        assert_eq!(summary.obtained, 8);
        assert_eq!(summary.short_batches, 4);
    }

    #[tokio::test]
    async fn test_resume_fills_only_missing_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.jsonl");

        let first = GenerationRunner::new(
            Arc::new(EchoProvider::new(Some(2))),
            GenerationSettings::default().with_iterations(3),
        );
        first.run(&tasks(1), &path).await.unwrap();

        let provider = Arc::new(EchoProvider::new(None));
        let second = GenerationRunner::new(
            provider.clone(),
            GenerationSettings::default().with_iterations(3),
        );
        let summary = second.run(&tasks(1), &path).await.unwrap();
        assert_eq!(summary.requested, 4);
        assert_eq!(summary.obtained, 4);

        let records = GenerationLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 12);
        let neutral: Vec<u32> = records
            .iter()
            .filter(|r| r.condition == Condition::Neutral)
            .map(|r| r.iteration)
            .collect();
        assert_eq!(neutral, vec![0, 1, 2]);

        // A third run has nothing left to do.
        let summary = second.run(&tasks(1), &path).await.unwrap();
        assert_eq!(summary.skipped_groups, 4);
        assert_eq!(summary.requested, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }
}
