//! Response classifiers: early cutoff and repetition detection
//!
//! Both are deliberately separate from the orchestrator so their policies
//! can be swapped or disabled. The early-cutoff classifier trades a small
//! risk of truncation for materially lower time-to-first-audio on long
//! generations; it fires only on text that already constitutes a complete
//! conversational turn.

use once_cell::sync::Lazy;
use regex::Regex;

use outdial_cache::{jaccard_similarity, normalize};

/// Verdict after each punctuation-terminated fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffDecision {
    /// Keep consuming tokens
    Continue,
    /// The accumulated text is a deliverable turn; stop generation
    Cutoff { reason: &'static str },
}

/// Pluggable early-cutoff policy: `(accumulatedText, newFragment) → decision`
pub trait ResponseClassifier: Send + Sync {
    fn evaluate(&self, accumulated: &str, new_fragment: &str) -> CutoffDecision;
}

static YES_NO_QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(are|is|am|do|does|did|can|could|would|will|should|shall|have|has|may|were|was)\b[^?]*\?$",
    )
    .expect("question pattern")
});

static INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(please|go ahead and|just|simply|let me know)\b.*[.!]$").expect("instruction pattern")
});

/// Conjunctions that signal an unfinished thought before the terminator
static TRAILING_CONJUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(and|but|or|so|because|however|although|while)\s*[.,]?$").expect("conjunction pattern")
});

/// Default cutoff classifier: complete-turn patterns plus length bounds
pub struct PatternCutoff {
    min_chars: usize,
    max_chars: usize,
}

impl PatternCutoff {
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
        }
    }

    /// Is the last sentence of the accumulated text a complete turn?
    fn is_complete_turn(&self, accumulated: &str) -> Option<&'static str> {
        let trimmed = accumulated.trim();

        // Take the final sentence for pattern matching
        let last_sentence = trimmed
            .rsplit_terminator(['.', '!', '?'])
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let candidate = match last_sentence {
            // rsplit_terminator drops the terminator, so re-attach it
            Some(sentence) => {
                let terminator = trimmed.chars().last()?;
                format!("{}{}", sentence, terminator)
            },
            None => trimmed.to_string(),
        };

        if YES_NO_QUESTION.is_match(&candidate) {
            return Some("yes_no_question");
        }
        if INSTRUCTION.is_match(&candidate) {
            return Some("instruction");
        }

        // A statement ending in terminal punctuation with no dangling
        // conjunction reads as finished
        if (trimmed.ends_with('.') || trimmed.ends_with('!'))
            && !TRAILING_CONJUNCTION.is_match(trimmed.trim_end_matches(['.', '!']))
        {
            return Some("complete_statement");
        }

        None
    }
}

impl ResponseClassifier for PatternCutoff {
    fn evaluate(&self, accumulated: &str, new_fragment: &str) -> CutoffDecision {
        let trimmed = accumulated.trim();

        if trimmed.len() >= self.max_chars {
            return CutoffDecision::Cutoff {
                reason: "max_length",
            };
        }
        if trimmed.len() < self.min_chars {
            return CutoffDecision::Continue;
        }
        // Only evaluate at fragment boundaries that end with terminal punctuation
        if !new_fragment
            .trim_end()
            .ends_with(['.', '!', '?'])
        {
            return CutoffDecision::Continue;
        }

        match self.is_complete_turn(trimmed) {
            Some(reason) => CutoffDecision::Cutoff { reason },
            None => CutoffDecision::Continue,
        }
    }
}

/// Detects conversational loops: the same or topically-equivalent agent
/// utterance recurring beyond a threshold within the recent-exchange window.
pub struct RepetitionDetector {
    threshold: usize,
    similarity: f64,
}

impl RepetitionDetector {
    pub fn new(threshold: usize, similarity: f64) -> Self {
        Self {
            threshold,
            similarity,
        }
    }

    /// Would saying `candidate` now repeat the recent exchanges?
    pub fn is_repetitive(&self, candidate: &str, recent: &[String]) -> bool {
        let normalized = normalize(candidate);
        if normalized.is_empty() {
            return false;
        }

        let equivalent = recent
            .iter()
            .filter(|past| jaccard_similarity(&normalized, &normalize(past)) >= self.similarity)
            .count();

        equivalent >= self.threshold
    }
}
