//! Evaluation job, verdict and the evaluator seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Detail recorded for a passing sample.
pub const DETAIL_PASSED: &str = "passed";

/// Detail recorded when the wall-clock limit expires.
pub const DETAIL_TIMED_OUT: &str = "timed out";

const CRASH_PREFIX: &str = "failed: worker crashed";

/// Everything needed to judge one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalJob {
    pub task_id: String,
    pub prompt: String,
    /// Raw model completion; code is extracted by the evaluator.
    pub completion: String,
    pub test: String,
    pub entry_point: String,
}

/// Outcome of evaluating one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    /// `"passed"`, `"timed out"` or `"failed: <reason>"`.
    pub detail: String,
}

impl Verdict {
    pub fn passed() -> Self {
        Self {
            passed: true,
            detail: DETAIL_PASSED.to_string(),
        }
    }

    pub fn failed(reason: impl AsRef<str>) -> Self {
        Self {
            passed: false,
            detail: format!("failed: {}", reason.as_ref()),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            passed: false,
            detail: DETAIL_TIMED_OUT.to_string(),
        }
    }

    /// Verdict for an evaluation whose worker task panicked or was aborted.
    pub fn crashed(reason: impl AsRef<str>) -> Self {
        Self::failed(format!("worker crashed: {}", reason.as_ref()))
    }

    pub fn is_timeout(&self) -> bool {
        self.detail == DETAIL_TIMED_OUT
    }

    pub fn is_crash(&self) -> bool {
        self.detail.starts_with(CRASH_PREFIX)
    }
}

/// Judges a completion against its task's hidden test.
///
/// Implementations never fail: every problem becomes a failed verdict.
#[async_trait]
pub trait CodeEvaluator: Send + Sync {
    async fn evaluate(&self, job: &EvalJob) -> Verdict;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_details() {
        assert_eq!(Verdict::passed().detail, "passed");
        assert_eq!(Verdict::failed("ZeroDivisionError").detail, "failed: ZeroDivisionError");
        assert!(Verdict::timed_out().is_timeout());
        assert!(!Verdict::timed_out().passed);

        let crashed = Verdict::crashed("boom");
        assert_eq!(crashed.detail, "failed: worker crashed: boom");
        assert!(crashed.is_crash());
        assert!(!Verdict::failed("x").is_crash());
    }
}
