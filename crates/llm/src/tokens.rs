//! Token length estimation.
//!
//! The chunker only needs a consistent proxy for model tokenization, so the
//! default counter works from a characters-per-token ratio. Anything
//! implementing [`TokenCounter`] can be swapped in.

/// Length estimator used for budget accounting.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Average characters per token observed for this counter.
    fn chars_per_token(&self, text: &str) -> f64 {
        let tokens = self.count(text);
        if tokens == 0 {
            4.0
        } else {
            text.len() as f64 / tokens as f64
        }
    }
}

/// Character-ratio estimator (≈4 chars per token for English prose).
#[derive(Debug, Clone)]
pub struct CharTokenizer {
    pub chars_per_token: f64,
}

impl Default for CharTokenizer {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
        }
    }
}

impl TokenCounter for CharTokenizer {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(CharTokenizer::default().count(""), 0);
    }

    #[test]
    fn count_scales_with_length() {
        let counter = CharTokenizer::default();
        let short = counter.count("hello world");
        let long = counter.count(&"hello world ".repeat(100));
        assert!(long > short * 50);
    }

    #[test]
    fn chars_per_token_matches_ratio() {
        let counter = CharTokenizer::default();
        let text = "a".repeat(400);
        let ratio = counter.chars_per_token(&text);
        assert!((ratio - 4.0).abs() < 0.1);
    }
}
