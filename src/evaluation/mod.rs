//! Functional-correctness evaluation.
//!
//! - [`extract`]: pulls program text out of markdown-wrapped completions.
//! - [`sandbox`]: runs one program per isolated interpreter process.
//! - [`pool`]: evaluates many jobs with bounded concurrency.
//!
//! Evaluation has no error type. Compile errors, exceptions, timeouts and
//! sandbox failures all become a failed [`Verdict`].

pub mod extract;
pub mod job;
pub mod pool;
pub mod sandbox;

pub use extract::extract_code;
pub use job::{CodeEvaluator, EvalJob, Verdict, DETAIL_PASSED, DETAIL_TIMED_OUT};
pub use pool::{EvaluationPool, PoolConfig, PoolStats};
pub use sandbox::{Sandbox, SandboxConfig};
