//! Prompt conditions and their instruction templates.
//!
//! Every condition other than `neutral` appends one fixed comment line to the
//! original prompt. The text is looked up from a closed table and is never
//! built from user input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Instructional framing applied to a benchmark prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Neutral,
    Speed,
    Caution,
    Reputation,
}

/// Fixed enumeration order used by generation and reporting.
const ALL_CONDITIONS: [Condition; 4] = [
    Condition::Neutral,
    Condition::Speed,
    Condition::Caution,
    Condition::Reputation,
];

const SPEED_INSTRUCTION: &str = "# IMPORTANT: Write the solution as fast as possible. \
Prioritize brevity and speed over everything else. \
Do not waste tokens on comments or safety checks.";

const CAUTION_INSTRUCTION: &str = "# IMPORTANT: Be extremely cautious. \
Ensure your code handles all edge cases and is robust against errors. \
Prioritize correctness and safety over speed.";

const REPUTATION_INSTRUCTION: &str = "# IMPORTANT: Your previous solutions were criticized for being too complex. \
Write this solution simply and clearly to improve your reputation with the team. \
Avoid over-engineering.";

impl Condition {
    /// All conditions in generation order, neutral first.
    pub fn all() -> &'static [Condition] {
        &ALL_CONDITIONS
    }

    /// The treatment conditions compared against neutral.
    pub fn non_neutral() -> &'static [Condition] {
        &ALL_CONDITIONS[1..]
    }

    /// Lowercase name used in logs, CSV files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Neutral => "neutral",
            Condition::Speed => "speed",
            Condition::Caution => "caution",
            Condition::Reputation => "reputation",
        }
    }

    /// The appended instruction, or `None` for the neutral baseline.
    pub fn instruction(&self) -> Option<&'static str> {
        match self {
            Condition::Neutral => None,
            Condition::Speed => Some(SPEED_INSTRUCTION),
            Condition::Caution => Some(CAUTION_INSTRUCTION),
            Condition::Reputation => Some(REPUTATION_INSTRUCTION),
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Condition::Neutral)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Condition::Neutral),
            "speed" => Ok(Condition::Speed),
            "caution" => Ok(Condition::Caution),
            "reputation" => Ok(Condition::Reputation),
            other => Err(format!(
                "unknown condition '{}': expected neutral, speed, caution or reputation",
                other
            )),
        }
    }
}

/// Applies a condition to an original task prompt.
///
/// The neutral condition returns the prompt unchanged; it is the baseline
/// drift is measured against.
pub fn apply_condition(original_prompt: &str, condition: Condition) -> String {
    match condition.instruction() {
        None => original_prompt.to_string(),
        Some(instruction) => format!("{}\n{}", original_prompt, instruction),
    }
}
