//! End-to-end experiment: generation, merge, sandboxed evaluation, metrics.
//!
//! Requires a `python3` interpreter; skipped when none is available.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use goal_drift::evaluation::{Sandbox, SandboxConfig};
use goal_drift::llm::{CompletionProvider, ProviderKind};
use goal_drift::pipeline::{ExperimentConfig, ExperimentRunner, ProviderFactory, RunSpec};
use goal_drift::prompts::Condition;
use tempfile::TempDir;

/// Answers every prompt with a fixed solution per task, right or wrong.
struct StubProvider {
    model: String,
    correct: bool,
}

#[async_trait]
impl CompletionProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, n: usize, _temperature: f64) -> Vec<String> {
        let body = match (prompt.contains("def add"), self.correct) {
            (true, true) => "```python\n    return a + b\n```",
            (true, false) => "    return a - b\n",
            (false, true) => "    return n % 2 == 0\n",
            (false, false) => "    return 1 / 0\n",
        };
        vec![body.to_string(); n]
    }
}

fn write_benchmark(path: &Path) {
    let tasks = [
        serde_json::json!({
            "task_id": "E2E/0",
            "prompt": "def add(a, b):\n    \"\"\"Return the sum of a and b.\"\"\"\n",
            "entry_point": "add",
            "canonical_solution": "    return a + b\n",
            "test": "def check(candidate):\n    assert candidate(2, 3) == 5\n    assert candidate(-1, 1) == 0\n",
        }),
        serde_json::json!({
            "task_id": "E2E/1",
            "prompt": "def is_even(n):\n    \"\"\"Return True if n is even.\"\"\"\n",
            "entry_point": "is_even",
            "canonical_solution": "    return n % 2 == 0\n",
            "test": "def check(candidate):\n    assert candidate(4)\n    assert not candidate(7)\n",
        }),
    ];
    let body: String = tasks.iter().map(|t| format!("{}\n", t)).collect();
    std::fs::write(path, body).unwrap();
}

fn stub_factory() -> ProviderFactory {
    Arc::new(|run: &RunSpec| {
        Ok(Arc::new(StubProvider {
            model: run.model_name().to_string(),
            correct: run.model_name() == "always-right",
        }) as Arc<dyn CompletionProvider>)
    })
}

#[tokio::test]
async fn test_experiment_measures_per_model_correctness() {
    let sandbox = Sandbox::new(SandboxConfig::default().with_timeout(Duration::from_secs(5)));
    if !sandbox.is_available().await {
        eprintln!("python3 not available, skipping");
        return;
    }

    let dir = TempDir::new().unwrap();
    let bench = dir.path().join("bench.jsonl");
    write_benchmark(&bench);
    let analysis_dir = dir.path().join("analysis");

    let config = ExperimentConfig::default()
        .with_benchmark(&bench)
        .with_iterations(3)
        .with_run(
            RunSpec::new(ProviderKind::OpenAi, dir.path().join("right.jsonl"))
                .with_model("always-right"),
        )
        .with_run(
            RunSpec::new(ProviderKind::Anthropic, dir.path().join("wrong.jsonl"))
                .with_model("always-wrong"),
        )
        .with_merged_output(dir.path().join("merged.jsonl"))
        .with_analysis_dir(&analysis_dir)
        .with_max_workers(Some(4));

    let runner = ExperimentRunner::new(config)
        .with_provider_factory(stub_factory())
        .with_evaluator(Arc::new(sandbox));
    let report = runner.run().await.unwrap();

    // 2 models x 2 tasks x 4 conditions x 3 iterations.
    assert!(report.runs.iter().all(|r| r.succeeded()));
    assert_eq!(report.merge.unique, 48);
    assert_eq!(report.analysis.records, 48);
    assert_eq!(report.analysis.cache_status, "miss");

    let tables = &report.analysis.tables;
    assert_eq!(tables.per_task.len(), 16);
    for row in &tables.per_task {
        let expected = if row.model == "always-right" { 1.0 } else { 0.0 };
        assert_eq!(
            row.task_pass_rate, expected,
            "{} {} {}",
            row.model, row.condition, row.task_id
        );
        assert_eq!(row.samples, 3);
    }

    assert_eq!(tables.drift.len(), 6);
    assert!(tables.drift.iter().all(|d| d.absolute_drift == 0.0));

    let right_reliability: Vec<_> = tables
        .reliability
        .iter()
        .filter(|r| r.model == "always-right")
        .collect();
    assert_eq!(right_reliability.len(), Condition::all().len());
    assert!(right_reliability.iter().all(|r| r.reliability_score == 1.0));

    for name in [
        "pass_rates_summary.csv",
        "per_task_breakdown.csv",
        "drift_analysis.csv",
        "reliability_scores.csv",
        "statistical_significance.csv",
        "top_drifted_tasks.csv",
        "codebleu_scores.csv",
        "code_length_summary.csv",
    ] {
        assert!(analysis_dir.join(name).exists(), "{} missing", name);
    }

    // Unchanged logs: the second analysis reuses the evaluated corpus.
    let again = runner.run().await.unwrap();
    assert_eq!(again.analysis.cache_status, "hit");
    assert_eq!(again.analysis.pass_rates, report.analysis.pass_rates);
    assert!(again.runs.iter().all(|r| {
        r.summary
            .as_ref()
            .is_some_and(|s| s.obtained == 0 && s.skipped_groups == 8)
    }));
}
