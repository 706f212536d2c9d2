//! Code extraction from raw model completions.
//!
//! Models often wrap code in markdown fences. Extraction prefers a block
//! tagged as Python, then any fenced block, and otherwise returns the
//! completion unchanged.

use std::sync::OnceLock;

use regex::Regex;

static PYTHON_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
static ANY_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();

fn python_block() -> Option<&'static Regex> {
    PYTHON_BLOCK
        .get_or_init(|| Regex::new(r"```[ \t]*(?i:python3|python|py)[ \t]*\r?\n([\s\S]*?)\r?\n?```").ok())
        .as_ref()
}

fn any_block() -> Option<&'static Regex> {
    ANY_BLOCK
        .get_or_init(|| Regex::new(r"```[^\n`]*\r?\n([\s\S]*?)\r?\n?```").ok())
        .as_ref()
}

fn first_capture<'a>(re: Option<&Regex>, text: &'a str) -> Option<&'a str> {
    re?.captures(text)?.get(1).map(|m| m.as_str())
}

/// Extracts the program text from a completion. Never fails.
pub fn extract_code(raw: &str) -> String {
    first_capture(python_block(), raw)
        .or_else(|| first_capture(any_block(), raw))
        .unwrap_or(raw)
        .to_string()
}
