//! Token-level BLEU as a similarity proxy between a completion and the
//! canonical solution.
//!
//! Sentence BLEU with uniform 4-gram weights, a brevity penalty, and
//! epsilon smoothing (0.1) for n-gram orders without matches.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

const MAX_ORDER: usize = 4;
const SMOOTHING_EPSILON: f64 = 0.1;

static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();

/// Splits code into identifier/number runs and single punctuation marks.
pub fn tokenize(code: &str) -> Vec<&str> {
    let Some(re) = TOKEN.get_or_init(|| Regex::new(r"\w+|[^\w\s]").ok()).as_ref() else {
        return code.split_whitespace().collect();
    };
    re.find_iter(code).map(|m| m.as_str()).collect()
}

fn ngram_counts<'a>(tokens: &'a [&'a str], n: usize) -> HashMap<&'a [&'a str], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Smoothed sentence BLEU of `candidate` against a single `reference`.
///
/// Returns 0.0 when the candidate is empty or shares no unigram with the
/// reference.
pub fn sentence_bleu(reference: &[&str], candidate: &[&str]) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }

    let mut log_sum = 0.0;
    for n in 1..=MAX_ORDER {
        let cand = ngram_counts(candidate, n);
        let refs = ngram_counts(reference, n);

        let matches: usize = cand
            .iter()
            .map(|(gram, &count)| count.min(refs.get(gram).copied().unwrap_or(0)))
            .sum();
        let total = candidate.len().saturating_sub(n - 1).max(1);

        if n == 1 && matches == 0 {
            return 0.0;
        }
        let precision = if matches == 0 {
            SMOOTHING_EPSILON / total as f64
        } else {
            matches as f64 / total as f64
        };
        log_sum += precision.ln() / MAX_ORDER as f64;
    }

    let (c, r) = (candidate.len() as f64, reference.len() as f64);
    let brevity_penalty = if c > r { 1.0 } else { (1.0 - r / c).exp() };

    brevity_penalty * log_sum.exp()
}

/// BLEU similarity between two code strings.
pub fn codebleu_proxy(reference_code: &str, candidate_code: &str) -> f64 {
    sentence_bleu(&tokenize(reference_code), &tokenize(candidate_code))
}
