//! Transcript + diarization assembly.

use rf_domain::transcript::{DiarizationSegment, Word};

/// Relabel words with diarization speakers by maximal temporal overlap.
///
/// With no diarization the words pass through untouched, keeping their
/// track-index speakers. Ties break on the earliest segment start, words
/// with no overlapping segment keep their original speaker, and order is
/// preserved.
pub fn assign_speakers(mut words: Vec<Word>, diarization: &[DiarizationSegment]) -> Vec<Word> {
    if diarization.is_empty() {
        return words;
    }

    for word in &mut words {
        let mut best: Option<(f64, &DiarizationSegment)> = None;
        for segment in diarization {
            let overlap = overlap_seconds(word, segment);
            if overlap <= 0.0 {
                continue;
            }
            best = match best {
                None => Some((overlap, segment)),
                Some((best_overlap, best_segment)) => {
                    if overlap > best_overlap
                        || (overlap == best_overlap && segment.start < best_segment.start)
                    {
                        Some((overlap, segment))
                    } else {
                        Some((best_overlap, best_segment))
                    }
                }
            };
        }
        if let Some((_, segment)) = best {
            word.speaker = segment.speaker;
        }
    }

    words
}

fn overlap_seconds(word: &Word, segment: &DiarizationSegment) -> f64 {
    let start = word.start.max(segment.start);
    let end = word.end.min(segment.end);
    end - start
}
