//! Benchmark task definitions and loading.
//!
//! Tasks come from a HumanEval-format JSONL file (optionally gzip-compressed).
//! They are loaded once and never mutated.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BenchmarkError;

/// One benchmark coding problem with a hidden correctness test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (e.g. "HumanEval/0").
    pub task_id: String,
    /// Prompt shown to the model (signature plus docstring).
    pub prompt: String,
    /// Name of the function the test program calls.
    pub entry_point: String,
    /// Reference solution body.
    pub canonical_solution: String,
    /// Test program defining `check(candidate)`.
    pub test: String,
}

/// Source of benchmark tasks.
///
/// Implementations must be idempotent and total for a fixed benchmark version.
pub trait TaskSource {
    /// Loads every task in the benchmark.
    fn load_tasks(&self) -> Result<Vec<Task>, BenchmarkError>;
}

/// Loads tasks from a `.jsonl` or `.jsonl.gz` file, one task per line.
#[derive(Debug, Clone)]
pub struct JsonlTaskSource {
    path: PathBuf,
}

impl JsonlTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Box<dyn Read>, BenchmarkError> {
        let file = File::open(&self.path)?;
        let is_gzip = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("gz"));

        if is_gzip {
            Ok(Box::new(GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }
}

impl TaskSource for JsonlTaskSource {
    fn load_tasks(&self) -> Result<Vec<Task>, BenchmarkError> {
        let reader = BufReader::new(self.open()?);
        let mut tasks = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let task: Task =
                serde_json::from_str(&line).map_err(|e| BenchmarkError::InvalidTask {
                    path: self.path.clone(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            tasks.push(task);
        }

        if tasks.is_empty() {
            return Err(BenchmarkError::Empty(self.path.clone()));
        }

        debug!(path = %self.path.display(), count = tasks.len(), "Loaded benchmark tasks");
        Ok(tasks)
    }
}

/// Tasks indexed by id, preserving benchmark order.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskSet {
    /// Builds a task set, rejecting duplicate ids.
    pub fn new(tasks: Vec<Task>) -> Result<Self, BenchmarkError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (pos, task) in tasks.iter().enumerate() {
            if index.insert(task.task_id.clone(), pos).is_some() {
                return Err(BenchmarkError::DuplicateTask(task.task_id.clone()));
            }
        }
        Ok(Self { tasks, index })
    }

    /// Loads and indexes every task from a source.
    pub fn load(source: &dyn TaskSource) -> Result<Self, BenchmarkError> {
        let set = Self::new(source.load_tasks()?)?;
        info!(tasks = set.len(), "Benchmark loaded");
        Ok(set)
    }

    /// Looks up a task, failing loudly when it is unknown.
    pub fn get(&self, task_id: &str) -> Result<&Task, BenchmarkError> {
        self.index
            .get(task_id)
            .map(|&pos| &self.tasks[pos])
            .ok_or_else(|| BenchmarkError::TaskNotFound(task_id.to_string()))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// Tasks in benchmark order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// The first `limit` tasks, or all of them.
    pub fn head(&self, limit: Option<usize>) -> &[Task] {
        match limit {
            Some(n) => &self.tasks[..n.min(self.tasks.len())],
            None => &self.tasks,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
