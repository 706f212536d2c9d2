//! Generation and evaluation record types.

use serde::{Deserialize, Serialize};

use crate::evaluation::Verdict;
use crate::prompts::Condition;

/// Row type with a fixed CSV header.
///
/// Lets writers emit the header for an empty table; `COLUMNS` must match the
/// serialized field order.
pub trait CsvRow {
    const COLUMNS: &'static [&'static str];
}

/// One model completion for one conditioned task prompt.
///
/// Written once to the generation log and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub task_id: String,
    pub condition: Condition,
    pub iteration: u32,
    /// Prompt as sent to the model (after conditioning).
    pub prompt: String,
    pub completion: String,
    pub model: String,
    pub canonical_solution: String,
    pub entry_point: String,
}

impl GenerationRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            task_id: self.task_id.clone(),
            condition: self.condition,
            model: self.model.clone(),
            iteration: self.iteration,
        }
    }
}

/// Identity of a record: `(task_id, condition, model, iteration)`.
///
/// Deserializes from a full record line, ignoring the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub task_id: String,
    pub condition: Condition,
    pub model: String,
    pub iteration: u32,
}

impl RecordKey {
    /// Parses the identity key from one JSONL record line.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// A generation record plus its evaluation outcome.
///
/// Kept flat so it maps one-to-one onto a CSV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub task_id: String,
    pub condition: Condition,
    pub iteration: u32,
    pub prompt: String,
    pub completion: String,
    pub model: String,
    pub canonical_solution: String,
    pub entry_point: String,
    pub passed: bool,
    pub execution_detail: String,
    /// Character count of the raw completion.
    pub code_length: usize,
    /// Similarity to the canonical solution, filled in after evaluation.
    #[serde(default)]
    pub codebleu: Option<f64>,
}

impl CsvRow for EvaluationRecord {
    const COLUMNS: &'static [&'static str] = &[
        "task_id",
        "condition",
        "iteration",
        "prompt",
        "completion",
        "model",
        "canonical_solution",
        "entry_point",
        "passed",
        "execution_detail",
        "code_length",
        "codebleu",
    ];
}

impl EvaluationRecord {
    pub fn from_generation(record: GenerationRecord, verdict: Verdict) -> Self {
        let code_length = record.completion.chars().count();
        Self {
            task_id: record.task_id,
            condition: record.condition,
            iteration: record.iteration,
            prompt: record.prompt,
            completion: record.completion,
            model: record.model,
            canonical_solution: record.canonical_solution,
            entry_point: record.entry_point,
            passed: verdict.passed,
            execution_detail: verdict.detail,
            code_length,
            codebleu: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            task_id: self.task_id.clone(),
            condition: self.condition,
            model: self.model.clone(),
            iteration: self.iteration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str, condition: Condition, iteration: u32) -> GenerationRecord {
        GenerationRecord {
            task_id: task.to_string(),
            condition,
            iteration,
            prompt: "def f():\n".to_string(),
            completion: "    return 1\n".to_string(),
            model: "stub".to_string(),
            canonical_solution: "    return 1\n".to_string(),
            entry_point: "f".to_string(),
        }
    }

    #[test]
    fn test_key_from_json_line_ignores_other_fields() {
        let rec = record("HumanEval/3", Condition::Caution, 7);
        let line = serde_json::to_string(&rec).unwrap();
        let key = RecordKey::from_json_line(&line).unwrap();
        assert_eq!(key, rec.key());
    }

    #[test]
    fn test_key_requires_all_fields() {
        assert!(RecordKey::from_json_line(r#"{"task_id": "T/0", "condition": "speed"}"#).is_err());
        assert!(RecordKey::from_json_line("not json").is_err());
    }

    #[test]
    fn test_condition_serializes_lowercase() {
        let line = serde_json::to_string(&record("T/0", Condition::Reputation, 0)).unwrap();
        assert!(line.contains("\"condition\":\"reputation\""));
    }

    #[test]
    fn test_from_generation_counts_chars() {
        let mut rec = record("T/0", Condition::Neutral, 0);
        rec.completion = "é = 1".to_string();
        let eval = EvaluationRecord::from_generation(
            rec.clone(),
            Verdict {
                passed: false,
                detail: "timed out".to_string(),
            },
        );
        assert_eq!(eval.code_length, 5);
        assert!(!eval.passed);
        assert_eq!(eval.execution_detail, "timed out");
        assert_eq!(eval.key(), rec.key());
        assert!(eval.codebleu.is_none());
    }
}
