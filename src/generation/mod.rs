//! Completion generation.
//!
//! [`GenerationRunner`] samples a provider over every task and condition and
//! persists each completion to a [`GenerationLog`]. Re-running against an
//! existing log only requests the samples still missing.

pub mod log;
pub mod orchestrator;

pub use log::{GenerationLog, GroupProgress};
pub use orchestrator::{
    GenerationRunner, GenerationSettings, GenerationSummary, DEFAULT_ITERATIONS,
    DEFAULT_TEMPERATURE,
};
