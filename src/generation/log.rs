//! Append-only JSONL generation log.
//!
//! The log is the durable output of a generation run and the input of every
//! later stage. Records are flushed one by one, so an interrupted run leaves
//! a valid prefix, possibly followed by a partial final line. Readers drop
//! that partial line; any other malformed line is an error.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::corpus::GenerationRecord;
use crate::error::StorageError;
use crate::prompts::Condition;

/// Progress of one (task, condition) group for a given model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupProgress {
    /// Completions already logged.
    pub count: usize,
    /// Iteration number for the next completion.
    pub next_iteration: u32,
}

/// Writer for a generation log file.
pub struct GenerationLog {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl GenerationLog {
    /// Opens `path` for appending, creating it and its parent directories.
    ///
    /// A partial trailing line left by an interrupted write is truncated so
    /// new records start on a fresh line.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        truncate_partial_line(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Appends one record and flushes it to disk.
    pub fn append(&mut self, record: &GenerationRecord) -> Result<(), StorageError> {
        let line = serde_json::to_string(record)?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .map_err(|e| StorageError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Reads every record in the log.
    pub fn read_records(path: &Path) -> Result<Vec<GenerationRecord>, StorageError> {
        let content = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        parse_records(path, &content)
    }

    /// Parses log content that was read elsewhere. `path` only labels errors.
    pub fn parse(path: &Path, content: &str) -> Result<Vec<GenerationRecord>, StorageError> {
        parse_records(path, content)
    }

    /// Per-(task, condition) progress of `model` in an existing log.
    ///
    /// A missing log means no progress.
    pub fn existing_counts(
        path: &Path,
        model: &str,
    ) -> Result<HashMap<(String, Condition), GroupProgress>, StorageError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let mut progress: HashMap<(String, Condition), GroupProgress> = HashMap::new();
        for record in Self::read_records(path)? {
            if record.model != model {
                continue;
            }
            let entry = progress
                .entry((record.task_id, record.condition))
                .or_insert(GroupProgress {
                    count: 0,
                    next_iteration: 0,
                });
            entry.count += 1;
            entry.next_iteration = entry.next_iteration.max(record.iteration + 1);
        }

        debug!(path = %path.display(), model, groups = progress.len(), "Scanned existing log");
        Ok(progress)
    }
}

/// Parses JSONL content, tolerating only an unterminated malformed last line.
fn parse_records(path: &Path, content: &str) -> Result<Vec<GenerationRecord>, StorageError> {
    let terminated = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let last = lines.len().saturating_sub(1);
    let mut records = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerationRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) if idx == last && !terminated => {
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %err,
                    "Dropping partial trailing line"
                );
            }
            Err(err) => {
                return Err(StorageError::MalformedLine {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(records)
}

fn truncate_partial_line(path: &Path) -> Result<(), StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }

    let keep = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "Truncating partial trailing line before appending"
    );

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StorageError::io(path, e))?;
    file.set_len(keep as u64)
        .map_err(|e| StorageError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(task: &str, condition: Condition, iteration: u32, model: &str) -> GenerationRecord {
        GenerationRecord {
            task_id: task.to_string(),
            condition,
            iteration,
            prompt: "p".to_string(),
            completion: "c".to_string(),
            model: model.to_string(),
            canonical_solution: "s".to_string(),
            entry_point: "f".to_string(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/generations.jsonl");

        let mut log = GenerationLog::open(&path).unwrap();
        log.append(&record("T/0", Condition::Neutral, 0, "m")).unwrap();
        log.append(&record("T/0", Condition::Speed, 0, "m")).unwrap();
        assert_eq!(log.written(), 2);

        let records = GenerationLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].condition, Condition::Speed);
    }

    #[test]
    fn test_partial_trailing_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let full = serde_json::to_string(&record("T/0", Condition::Neutral, 0, "m")).unwrap();
        std::fs::write(&path, format!("{}\n{{\"task_id\": \"T/1\", \"cond", full)).unwrap();

        let records = GenerationLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_interior_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let full = serde_json::to_string(&record("T/0", Condition::Neutral, 0, "m")).unwrap();
        std::fs::write(&path, format!("garbage\n{}\n", full)).unwrap();

        let err = GenerationLog::read_records(&path).unwrap_err();
        assert!(matches!(err, StorageError::MalformedLine { line: 1, .. }));
    }

    #[test]
    fn test_open_truncates_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let full = serde_json::to_string(&record("T/0", Condition::Neutral, 0, "m")).unwrap();
        std::fs::write(&path, format!("{}\n{{\"task_id\": \"T/1\"", full)).unwrap();

        let mut log = GenerationLog::open(&path).unwrap();
        log.append(&record("T/1", Condition::Neutral, 0, "m")).unwrap();

        let records = GenerationLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].task_id, "T/1");
    }

    #[test]
    fn test_existing_counts_per_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut log = GenerationLog::open(&path).unwrap();
        log.append(&record("T/0", Condition::Neutral, 0, "a")).unwrap();
        log.append(&record("T/0", Condition::Neutral, 1, "a")).unwrap();
        log.append(&record("T/0", Condition::Neutral, 4, "a")).unwrap();
        log.append(&record("T/0", Condition::Neutral, 0, "b")).unwrap();

        let counts = GenerationLog::existing_counts(&path, "a").unwrap();
        let progress = counts[&("T/0".to_string(), Condition::Neutral)];
        assert_eq!(progress.count, 3);
        assert_eq!(progress.next_iteration, 5);
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn test_existing_counts_missing_log() {
        let dir = TempDir::new().unwrap();
        let counts = GenerationLog::existing_counts(&dir.path().join("absent.jsonl"), "m").unwrap();
        assert!(counts.is_empty());
    }
}
