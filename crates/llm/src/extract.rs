//! JSON extraction from free-form model output.

use rf_domain::{Error, Result};

/// Pull a JSON value out of model text.
///
/// Tries fenced code blocks first (```json / ```javascript / bare ```),
/// then a trailing fence left over from a prompt that opened one, then the
/// raw text.
pub fn extract_json(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();

    let fence_re = regex::Regex::new(r"(?s)```(?:json|javascript|js)?\s*(.*?)```")
        .map_err(|e| Error::Other(format!("fence regex: {e}")))?;

    let candidate = if let Some(captures) = fence_re.captures(trimmed) {
        captures.get(1).map(|m| m.as_str()).unwrap_or(trimmed)
    } else if let Some(stripped) = trimmed.strip_suffix("```") {
        stripped
    } else {
        trimmed
    };

    serde_json::from_str(candidate.trim())
        .map_err(|e| Error::Llm(format!("unparseable JSON at {}: {e}", e.column())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let value = extract_json(r#"["a", "b"]"#).unwrap();
        assert_eq!(value[0], "a");
    }

    #[test]
    fn parses_json_fence() {
        let value = extract_json("```json\n{\"title\": \"Q3 Budget\"}\n```").unwrap();
        assert_eq!(value["title"], "Q3 Budget");
    }

    #[test]
    fn parses_js_fence() {
        let value = extract_json("```js\n[1, 2]\n```").unwrap();
        assert_eq!(value[1], 2);
    }

    #[test]
    fn parses_bare_fence() {
        let value = extract_json("```\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn strips_trailing_fence_only() {
        let value = extract_json("{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn garbage_is_an_llm_error() {
        assert!(matches!(
            extract_json("no json here"),
            Err(Error::Llm(_))
        ));
    }
}
