//! Command-line interface for goal-drift.
//!
//! Provides commands for generation, log merging, analysis and full
//! experiments.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
