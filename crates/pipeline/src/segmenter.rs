//! Sentence segmentation for the streaming token path
//!
//! Buffers language-model deltas and emits complete clauses for synthesis.
//! The first fragment is emitted early at a word boundary once it crosses a
//! minimum length, trading a little prosody for time-to-first-audio.

/// Segmenter configuration
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Emit the first fragment early once the buffer reaches this length
    pub first_fragment_min_chars: usize,
    /// Force a break at a word boundary past this buffer length
    pub max_buffer_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            first_fragment_min_chars: 15,
            max_buffer_chars: 500,
        }
    }
}

/// Streaming sentence segmenter
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    buffer: String,
    emitted_any: bool,
}

const TERMINATORS: &[char] = &['.', '!', '?'];

impl SentenceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            emitted_any: false,
        }
    }

    /// Feed a delta; returns any complete fragments ready for synthesis.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut fragments = self.extract_sentences();

        // First-fragment early emission for latency
        if fragments.is_empty() && !self.emitted_any {
            if self.buffer.trim().len() >= self.config.first_fragment_min_chars {
                if let Some(fragment) = self.break_at_word_boundary() {
                    fragments.push(fragment);
                }
            }
        } else if fragments.is_empty() && self.buffer.len() >= self.config.max_buffer_chars {
            if let Some(fragment) = self.break_at_word_boundary() {
                fragments.push(fragment);
            }
        }

        if !fragments.is_empty() {
            self.emitted_any = true;
        }
        fragments
    }

    /// Flush whatever remains at end of stream
    pub fn flush(&mut self) -> Option<String> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            None
        } else {
            self.emitted_any = true;
            Some(text)
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.emitted_any = false;
    }

    fn extract_sentences(&mut self) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = String::new();
        let chars: Vec<char> = self.buffer.chars().collect();
        let mut consumed = 0usize;
        let mut i = 0usize;

        while i < chars.len() {
            let c = chars[i];
            current.push(c);
            i += 1;

            if TERMINATORS.contains(&c) {
                // Swallow closing quotes and trailing whitespace
                while i < chars.len() {
                    let next = chars[i];
                    if next == '"' || next == '\'' || next == ')' {
                        current.push(next);
                        i += 1;
                    } else if next.is_whitespace() {
                        current.push(next);
                        i += 1;
                        break;
                    } else {
                        break;
                    }
                }

                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
                consumed = i;
            }
        }

        self.buffer = chars[consumed..].iter().collect();
        sentences
    }

    fn break_at_word_boundary(&mut self) -> Option<String> {
        let pos = self.buffer.rfind(char::is_whitespace)?;
        let fragment = self.buffer[..pos].trim().to_string();
        self.buffer = self.buffer[pos..].trim_start().to_string();
        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_sentences_extracted() {
        let mut segmenter = SentenceSegmenter::default();
        let fragments = segmenter.push("Hello there. How are you today? I'm");
        assert_eq!(fragments, vec!["Hello there.", "How are you today?"]);

        let rest = segmenter.flush();
        assert_eq!(rest.as_deref(), Some("I'm"));
    }

    #[test]
    fn test_first_fragment_emitted_early() {
        let mut segmenter = SentenceSegmenter::new(SegmenterConfig {
            first_fragment_min_chars: 10,
            max_buffer_chars: 500,
        });

        // No terminator yet, but past the early-emission threshold
        let fragments = segmenter.push("Thanks for taking my ");
        assert_eq!(fragments, vec!["Thanks for taking my"]);
    }

    #[test]
    fn test_early_emission_only_for_first_fragment() {
        let mut segmenter = SentenceSegmenter::new(SegmenterConfig {
            first_fragment_min_chars: 10,
            max_buffer_chars: 500,
        });

        segmenter.push("First bit here. ");
        // Past the first fragment, unterminated text buffers instead
        let fragments = segmenter.push("some more words without an end ");
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_streaming_deltas_accumulate() {
        let mut segmenter = SentenceSegmenter::new(SegmenterConfig {
            first_fragment_min_chars: 100,
            max_buffer_chars: 500,
        });

        assert!(segmenter.push("Are you the ").is_empty());
        let fragments = segmenter.push("computer owner?");
        assert_eq!(fragments, vec!["Are you the computer owner?"]);
    }

    #[test]
    fn test_quotes_after_terminator_stay_attached() {
        let mut segmenter = SentenceSegmenter::new(SegmenterConfig {
            first_fragment_min_chars: 100,
            max_buffer_chars: 500,
        });
        let fragments = segmenter.push("He said \"hello.\" Then left. ");
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], "He said \"hello.\"");
    }

    #[test]
    fn test_reset() {
        let mut segmenter = SentenceSegmenter::default();
        segmenter.push("partial text without end");
        segmenter.reset();
        assert!(segmenter.flush().is_none());
    }
}
