//! Prompt conditioning for drift experiments.
//!
//! A condition is an instructional variant (speed pressure, caution,
//! reputation concern) appended to a benchmark prompt. The neutral condition
//! leaves the prompt untouched and serves as the baseline.
//!
//! ```
//! use goal_drift::prompts::{apply_condition, Condition};
//!
//! let prompt = "def add(a, b):\n";
//! assert_eq!(apply_condition(prompt, Condition::Neutral), prompt);
//! assert!(apply_condition(prompt, Condition::Speed).contains("# IMPORTANT"));
//! ```

pub mod conditions;

pub use conditions::{apply_condition, Condition};
