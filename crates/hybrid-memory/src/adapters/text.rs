//! Keyword scoring used by the in-process and session search backends

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"[\p{L}\p{N}_']+").expect("word pattern compiles");
    static ref STOP_WORDS: BTreeSet<&'static str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "is", "am", "are", "was", "were", "be", "been",
        "have", "has", "had", "do", "does", "did", "will", "would", "should",
        "can", "could", "i", "you", "we", "they", "me", "my", "our", "it",
        "this", "that", "these", "those", "what", "when", "why", "how",
    ]
    .into_iter()
    .collect();
}

/// Lowercased, de-duplicated query terms with stop words removed. A query
/// made only of stop words keeps them.
pub fn query_terms(query: &str) -> Vec<String> {
    let all: Vec<String> = WORD_REGEX
        .find_iter(query)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    let meaningful: BTreeSet<String> = all
        .iter()
        .filter(|w| !STOP_WORDS.contains(w.as_str()))
        .cloned()
        .collect();
    if meaningful.is_empty() {
        all.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
    } else {
        meaningful.into_iter().collect()
    }
}

/// Relevance of `content` for `terms` in `[0, 1]`. Mostly term coverage,
/// with a small bonus for term density. Zero when nothing matches.
pub fn keyword_score(content: &str, terms: &[String]) -> f64 {
    if terms.is_empty() || content.is_empty() {
        return 0.0;
    }

    let words: Vec<String> = WORD_REGEX
        .find_iter(content)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if words.is_empty() {
        return 0.0;
    }

    let mut matched_terms = 0usize;
    let mut occurrences = 0usize;
    for term in terms {
        let count = words.iter().filter(|w| *w == term).count();
        if count > 0 {
            matched_terms += 1;
            occurrences += count;
        }
    }
    if matched_terms == 0 {
        return 0.0;
    }

    let coverage = matched_terms as f64 / terms.len() as f64;
    let density = (occurrences as f64 / words.len() as f64).min(1.0);
    (0.8 * coverage + 0.2 * density).min(1.0)
}
