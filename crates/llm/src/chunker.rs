//! Template-aware transcript chunking.
//!
//! The budget is computed from the real template: render it with an empty
//! body, count tokens, subtract from the context window, and only then
//! divide the corpus. Chunk boundaries snap to natural split points so no
//! sentence is cut mid-thought unless nothing better exists.

use rf_domain::{Error, Result};

use crate::tokens::TokenCounter;
use crate::PromptTemplate;

/// Natural split preference, strongest first: paragraph break, speaker-line
/// break, sentence ending, line break, whitespace, hard cut.
pub fn find_natural_split_point(text: &str, target_pos: usize, min_pos: usize) -> usize {
    let target_pos = floor_char_boundary(text, target_pos.min(text.len()));
    if target_pos <= min_pos {
        return target_pos;
    }

    let bytes = text.as_bytes();
    let window = 200.min(target_pos - min_pos);
    let floor = target_pos - window;

    // Paragraph breaks.
    for i in (floor..target_pos).rev() {
        if i + 1 < bytes.len() && &bytes[i..i + 2] == b"\n\n" {
            return i + 2;
        }
    }

    // Speaker changes, assuming a "Name: text" line format.
    for i in (floor.max(1)..target_pos).rev() {
        if bytes[i - 1] == b'\n' {
            let lookahead_end = (i + 50).min(bytes.len());
            if bytes[i..lookahead_end].contains(&b':') {
                return i;
            }
        }
    }

    // Sentence endings.
    for i in (floor..target_pos).rev() {
        if i + 1 < bytes.len()
            && matches!(bytes[i], b'.' | b'!' | b'?')
            && bytes[i + 1] == b' '
        {
            return i + 1;
        }
    }

    // Line breaks.
    for i in (floor..target_pos).rev() {
        if i < bytes.len() && bytes[i] == b'\n' {
            return i + 1;
        }
    }

    // Word boundaries.
    for i in (floor..target_pos).rev() {
        if i < bytes.len() && matches!(bytes[i], b' ' | b'\t') {
            return i + 1;
        }
    }

    target_pos
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Result of planning: the chunk texts plus the budget that produced them.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub chunks: Vec<String>,
    pub core_tokens: usize,
    pub overlap_tokens: usize,
}

/// The chunking policy.
#[derive(Debug, Clone)]
pub struct Chunker {
    pub max_context_tokens: usize,
    /// Fraction of a chunk shared with each neighbor (0 ≤ r < 0.5).
    pub overlap_ratio: f64,
    pub safety_margin_tokens: usize,
    pub max_chunks: usize,
    pub shrink_attempts: u32,
}

impl Chunker {
    pub fn new(max_context_tokens: usize, overlap_ratio: f64) -> Self {
        Self {
            max_context_tokens,
            overlap_ratio,
            safety_margin_tokens: 50,
            max_chunks: 50,
            shrink_attempts: 10,
        }
    }

    /// Plan chunks for `corpus` under the budget left by `template`.
    pub fn plan(
        &self,
        corpus: &str,
        template: &PromptTemplate,
        counter: &dyn TokenCounter,
    ) -> Result<ChunkPlan> {
        let overhead = template.overhead_tokens(counter);
        if overhead >= self.max_context_tokens {
            return Err(Error::Validation(format!(
                "template overhead ({overhead}) exceeds context limit ({})",
                self.max_context_tokens
            )));
        }

        let max_content = self
            .max_context_tokens
            .saturating_sub(overhead + self.safety_margin_tokens);
        if max_content == 0 {
            return Err(Error::Validation(
                "no space left for content after template overhead".into(),
            ));
        }

        if !(0.0..0.5).contains(&self.overlap_ratio) {
            return Err(Error::Validation(
                "overlap_ratio must be between 0 and 0.5".into(),
            ));
        }

        let total_tokens = counter.count(corpus);
        if total_tokens <= max_content {
            tracing::debug!("corpus fits in a single chunk");
            return Ok(ChunkPlan {
                chunks: vec![corpus.to_string()],
                core_tokens: max_content,
                overlap_tokens: 0,
            });
        }

        let overlap_tokens = (max_content as f64 * self.overlap_ratio) as usize;
        let core_tokens = max_content.saturating_sub(2 * overlap_tokens);
        if core_tokens == 0 {
            return Err(Error::Validation(
                "content space too small for the overlap ratio".into(),
            ));
        }

        tracing::debug!(
            max_content,
            core_tokens,
            overlap_tokens,
            "chunking corpus"
        );

        let mut chunks = self.generate(corpus, counter, core_tokens, overlap_tokens);

        for chunk in &mut chunks {
            let measured = measured_tokens(template, chunk, counter);
            // Character-based estimation is not uniform across text, so a
            // generated chunk can still bust the budget.
            if measured > self.max_context_tokens {
                tracing::warn!(measured, "chunk over budget, shrinking");
                *chunk = self.shrink_to_fit(chunk, template, counter);
            }
        }

        Ok(ChunkPlan {
            chunks,
            core_tokens,
            overlap_tokens,
        })
    }

    fn generate(
        &self,
        corpus: &str,
        counter: &dyn TokenCounter,
        core_tokens: usize,
        overlap_tokens: usize,
    ) -> Vec<String> {
        let chars_per_token = counter.chars_per_token(corpus);
        let estimate_safety = 0.85;
        let core_chars =
            ((core_tokens as f64 * chars_per_token * estimate_safety) as usize).max(1);
        let overlap_chars = (overlap_tokens as f64 * chars_per_token * estimate_safety) as usize;

        let mut chunks = Vec::new();
        let mut current = 0usize;
        let mut produced = 0usize;

        while current < corpus.len() && produced < self.max_chunks {
            let start = floor_char_boundary(corpus, current.saturating_sub(overlap_chars));
            let raw_end = (current + core_chars + overlap_chars).min(corpus.len());
            let end = find_natural_split_point(corpus, raw_end, current + core_chars);

            let chunk = &corpus[start..end.max(start)];
            if !chunk.trim().is_empty() {
                chunks.push(chunk.to_string());
            }

            current += core_chars;
            produced += 1;

            // Ensure forward progress on pathological inputs.
            if end <= start + 100 {
                current = start + 100;
            }
        }

        if produced >= self.max_chunks {
            tracing::warn!(max_chunks = self.max_chunks, "hit maximum chunk limit");
        }

        chunks
    }

    /// Trim a chunk by 10% at a time until it fits the full budget.
    fn shrink_to_fit(
        &self,
        chunk: &str,
        template: &PromptTemplate,
        counter: &dyn TokenCounter,
    ) -> String {
        let mut current = chunk.to_string();
        for _ in 0..self.shrink_attempts {
            if measured_tokens(template, &current, counter) <= self.max_context_tokens {
                return current;
            }
            let cut = (current.len() / 10).max(1);
            let keep = floor_char_boundary(&current, current.len().saturating_sub(cut));
            current.truncate(keep);
        }
        tracing::error!("could not shrink chunk to fit after {} attempts", self.shrink_attempts);
        current
    }
}

/// Tokens of the fully rendered prompt pair for a chunk.
pub fn measured_tokens(
    template: &PromptTemplate,
    chunk: &str,
    counter: &dyn TokenCounter,
) -> usize {
    counter.count(&template.system) + counter.count(&template.render(chunk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::CharTokenizer;

    fn template() -> PromptTemplate {
        PromptTemplate::new(
            &"You extract discussion subjects from meeting transcripts. ".repeat(10),
            &"List every subject discussed in the following transcript as a JSON array. "
                .repeat(6),
        )
    }

    fn corpus(tokens: usize) -> String {
        // ~4 chars per token with the default counter.
        let sentence = "The team reviewed the quarterly budget and milestones. ";
        let mut out = String::new();
        while out.len() < tokens * 4 {
            out.push_str(sentence);
            if out.len() % 1000 < sentence.len() {
                out.push_str("\n\nAlice: let's move on to the next point.\n");
            }
        }
        out
    }

    #[test]
    fn paragraph_break_preferred() {
        let text = "first paragraph.\n\nsecond paragraph continues here";
        let split = find_natural_split_point(text, 30, 5);
        assert_eq!(split, 18); // right after "\n\n"
    }

    #[test]
    fn sentence_ending_beats_whitespace() {
        let text = "one two three. four five six seven";
        let split = find_natural_split_point(text, 30, 5);
        assert_eq!(split, 14); // after ". "
    }

    #[test]
    fn hard_cut_when_no_separator() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let split = find_natural_split_point(text, 20, 10);
        assert_eq!(split, 20);
    }

    #[test]
    fn split_never_lands_inside_a_char() {
        let text = "héllo wörld ".repeat(50);
        let split = find_natural_split_point(&text, 101, 90);
        assert!(text.is_char_boundary(split));
    }

    #[test]
    fn small_corpus_is_a_single_chunk() {
        let chunker = Chunker::new(8192, 0.15);
        let plan = chunker
            .plan("short transcript", &template(), &CharTokenizer::default())
            .unwrap();
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0], "short transcript");
    }

    #[test]
    fn oversized_template_fails_fast() {
        let chunker = Chunker::new(64, 0.15);
        let err = chunker
            .plan("text", &template(), &CharTokenizer::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn every_chunk_respects_the_budget() {
        // 20k-token corpus into an 8k context with a ~300-token template.
        let counter = CharTokenizer::default();
        let tpl = template();
        let corpus = corpus(20_000);
        let chunker = Chunker::new(8192, 0.15);

        let plan = chunker.plan(&corpus, &tpl, &counter).unwrap();
        assert!(plan.chunks.len() > 1);

        for chunk in &plan.chunks {
            assert!(measured_tokens(&tpl, chunk, &counter) <= 8192);
        }

        // Overlap means the chunks together cover at least the corpus.
        let covered: usize = plan.chunks.iter().map(|c| c.len()).sum();
        assert!(covered >= corpus.len());
    }

    #[test]
    fn overlap_ratio_out_of_range_rejected() {
        let chunker = Chunker::new(8192, 0.5);
        let err = chunker
            .plan(&corpus(20_000), &template(), &CharTokenizer::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
