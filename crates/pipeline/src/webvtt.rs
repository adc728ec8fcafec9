//! WebVTT rendering of the final word list.

use rf_domain::transcript::Word;

/// Longest a single cue is allowed to run.
const MAX_CUE_SECONDS: f64 = 7.0;

/// Render speaker-attributed cues.
///
/// A new cue starts on every speaker change and whenever the running cue
/// exceeds the length cap.
pub fn render(words: &[Word]) -> String {
    let mut out = String::from("WEBVTT\n");

    let mut cue_words: Vec<&Word> = Vec::new();
    for word in words {
        let break_cue = match cue_words.first() {
            Some(first) => {
                first.speaker != word.speaker || word.end - first.start > MAX_CUE_SECONDS
            }
            None => false,
        };
        if break_cue {
            push_cue(&mut out, &cue_words);
            cue_words.clear();
        }
        cue_words.push(word);
    }
    push_cue(&mut out, &cue_words);

    out
}

fn push_cue(out: &mut String, words: &[&Word]) {
    let (Some(first), Some(last)) = (words.first(), words.last()) else {
        return;
    };
    let text = words
        .iter()
        .map(|w| w.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    out.push_str(&format!(
        "\n{} --> {}\n<v Speaker {}>{}\n",
        timestamp(first.start),
        timestamp(last.end),
        first.speaker,
        text
    ));
}

fn timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64, speaker: u32) -> Word {
        Word {
            text: text.into(),
            start,
            end,
            speaker,
        }
    }

    #[test]
    fn header_only_for_empty_words() {
        assert_eq!(render(&[]), "WEBVTT\n");
    }

    #[test]
    fn speaker_change_starts_a_new_cue() {
        let words = vec![
            word("hello", 0.0, 0.4, 0),
            word("there", 0.5, 0.8, 0),
            word("hi", 1.0, 1.2, 1),
        ];
        let vtt = render(&words);
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("<v Speaker 0>hello there"));
        assert!(vtt.contains("<v Speaker 1>hi"));
    }

    #[test]
    fn timestamps_are_vtt_formatted() {
        let words = vec![word("late", 3661.25, 3661.75, 0)];
        let vtt = render(&words);
        assert!(vtt.contains("01:01:01.250 --> 01:01:01.750"));
    }

    #[test]
    fn long_monologue_is_split() {
        let words: Vec<Word> = (0..20)
            .map(|i| word("w", i as f64, i as f64 + 0.5, 0))
            .collect();
        let vtt = render(&words);
        let cue_count = vtt.matches("<v Speaker 0>").count();
        assert!(cue_count > 1);
    }
}
