//! Benchmark task collaborator.
//!
//! The benchmark itself is external data; this module only knows how to read
//! HumanEval-format files and index tasks for lookup.

pub mod task;

pub use task::{JsonlTaskSource, Task, TaskSet, TaskSource};
