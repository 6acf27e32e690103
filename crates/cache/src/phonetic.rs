//! Text normalization, cacheability heuristics, and phonetic grouping
//!
//! The phonetic tier groups phrases by coarse sound/topic codes and accepts
//! the closest candidate by word-set similarity. Grouping is deliberately
//! loose — precision comes from the Jaccard acceptance gate, not from the
//! group keys.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Phrases that must never be served from cache: confusion/clarification
/// responses are context-bound and replaying them mid-conversation is worse
/// than the synthesis cost.
static UNCACHEABLE_MARKERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "sorry",
        "what was that",
        "could you repeat",
        "say that again",
        "didn't catch",
        "i'm not sure i understand",
        "pardon",
    ]
});

/// Topic buckets: any phrase containing one of these words joins the bucket,
/// widening the candidate set for near-miss lookups.
static TOPIC_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "hello", "hi", "thanks", "thank", "help", "computer", "account", "appointment", "time",
        "today", "tomorrow", "morning", "yes", "okay", "great", "moment", "question", "call",
    ]
});

/// Normalize text for exact-tier keys: lowercase, collapse whitespace, strip
/// punctuation.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Does this phrase qualify for the phonetic tier?
///
/// Digits (numbers, amounts, dates) and single-word utterances are excluded:
/// near-matches on those change meaning. Confusion phrases are excluded
/// entirely.
pub fn is_phonetically_cacheable(text: &str, min_chars: usize) -> bool {
    let normalized = normalize(text);
    if normalized.len() < min_chars {
        return false;
    }
    if normalized.split_whitespace().count() < 2 {
        return false;
    }
    if normalized.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    !UNCACHEABLE_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}

/// Consonant-skeleton code for one word: first letter plus deduplicated
/// consonants. "morning" → "mrnng" → "mrng". Coarse on purpose.
fn sound_code(word: &str) -> String {
    let mut code = String::new();
    let mut last = '\0';
    for (i, c) in word.chars().enumerate() {
        let keep = i == 0 || !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u');
        if keep && c != last {
            code.push(c);
            last = c;
        }
    }
    code
}

/// Extract coarse group tags for a phrase: a sound code per significant word
/// plus any matching topic buckets.
pub fn phonetic_groups(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let mut groups: HashSet<String> = HashSet::new();

    for word in normalized.split_whitespace() {
        if word.len() >= 3 {
            groups.insert(format!("s:{}", sound_code(word)));
        }
        if TOPIC_KEYWORDS.contains(&word) {
            groups.insert(format!("t:{}", word));
        }
    }

    let mut groups: Vec<String> = groups.into_iter().collect();
    groups.sort();
    groups
}

/// Word-set Jaccard similarity over normalized text
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}
