//! Title post-processing fallbacks.
//!
//! The model is responsible for casing, but it occasionally falters. Both
//! passes here are best-effort: any internal surprise returns the input
//! unchanged rather than blocking the pipeline.

/// Lead-in phrases that add no information to a topic title.
const LEAD_IN_PHRASES: &[&str] = &["Discussion on", "Discussion about", "Discussing"];

/// Words left lowercase unless they open the title.
const MINOR_WORDS: &[&str] = &[
    "a", "an", "the", "and", "but", "or", "nor", "for", "so", "yet", "as", "at", "by", "in",
    "of", "off", "on", "per", "to", "up", "via", "with", "from", "into", "onto", "over",
    "than", "that", "is", "are", "was", "be",
];

/// Strip a small closed set of lead-in phrases, case-insensitively.
pub fn trim_title(title: &str) -> String {
    let pattern = LEAD_IN_PHRASES
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    match regex::Regex::new(&format!(r"(?i)\b(?:{pattern})\b")) {
        Ok(re) => re.replace_all(title, "").trim().to_string(),
        Err(e) => {
            tracing::info!(error = %e, "failed to trim title");
            title.to_string()
        }
    }
}

/// Uppercase the first letter of content words that came back lowercase,
/// and always uppercase the first character of the title.
pub fn ensure_casing(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }

    let recased = title
        .split(' ')
        .map(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
            if bare.is_empty() || MINOR_WORDS.contains(&bare.to_lowercase().as_str()) {
                word.to_string()
            } else {
                uppercase_first(word)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    uppercase_first(&recased)
}

fn uppercase_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_lowercase() => {
            first.to_uppercase().collect::<String>() + chars.as_str()
        }
        _ => word.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_lead_in_phrases_case_insensitively() {
        assert_eq!(trim_title("Discussing Quarterly Budget"), "Quarterly Budget");
        assert_eq!(trim_title("discussion on Hiring Plans"), "Hiring Plans");
        assert_eq!(trim_title("Discussion about the Roadmap"), "the Roadmap");
    }

    #[test]
    fn leaves_ordinary_titles_alone() {
        assert_eq!(trim_title("Quarterly Budget Review"), "Quarterly Budget Review");
    }

    #[test]
    fn capitalizes_content_words() {
        assert_eq!(
            ensure_casing("quarterly budget review"),
            "Quarterly Budget Review"
        );
    }

    #[test]
    fn minor_words_stay_lowercase_mid_title() {
        assert_eq!(
            ensure_casing("state of the union"),
            "State of the Union"
        );
    }

    #[test]
    fn first_character_is_always_uppercased() {
        assert_eq!(ensure_casing("a plan emerges"), "A plan Emerges");
    }

    #[test]
    fn empty_title_stays_empty() {
        assert_eq!(ensure_casing(""), "");
    }
}
