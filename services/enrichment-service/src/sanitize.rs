//! Strips Markdown code fences that models wrap around JSON answers.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// A language tag only counts when it runs to the end of its line; a fence
// followed by prose on the same line only loses the backticks.
static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:([A-Za-z0-9_+.\-]+)[ \t]*(?:\r?\n|$)|[ \t]*\r?\n?)")
        .expect("fence pattern is valid")
});

/// Replacement for one fence match in `text`. A "tag" followed only by
/// whitespace up to the next fence is really the fenced body, so just the
/// backticks go.
fn strip_marker(text: &str, caps: &Captures) -> String {
    let (Some(marker), Some(_tag)) = (caps.get(0), caps.get(1)) else {
        return String::new();
    };
    let rest = &text[marker.end()..];
    let body = rest.split("```").next().unwrap_or_default();
    if body.trim().is_empty() {
        marker.as_str()[3..].to_string()
    } else {
        String::new()
    }
}

/// Remove every fence marker and trim the result.
///
/// Removal repeats until nothing matches, so the output never contains a
/// fence and `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str) -> String {
    let mut cur = raw.to_string();
    loop {
        let next = FENCE
            .replace_all(&cur, |caps: &Captures| strip_marker(&cur, caps))
            .into_owned();
        if next == cur {
            break;
        }
        cur = next;
    }
    cur.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "{\"sentiment_score\": 0.4}";

    #[test]
    fn plain_text_is_only_trimmed() {
        assert_eq!(sanitize("  \n{\"a\": 1}\n\t"), "{\"a\": 1}");
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("no fences here"), "no fences here");
    }

    #[test]
    fn fenced_with_language_tag() {
        let wrapped = format!("```json\n{BODY}\n```");
        assert_eq!(sanitize(&wrapped), BODY);
        let wrapped = format!("Here you go:\n```JSON\r\n{BODY}\r\n```\n");
        assert_eq!(sanitize(&wrapped), format!("Here you go:\n{BODY}"));
    }

    #[test]
    fn fenced_without_language_tag() {
        assert_eq!(sanitize(&format!("```\n{BODY}\n```")), BODY);
        assert_eq!(sanitize(&format!("```{BODY}```")), BODY);
    }

    #[test]
    fn prose_after_fence_survives() {
        assert_eq!(sanitize("{} ```and more text"), "{} and more text");
    }

    #[test]
    fn fenced_scalar_body_is_kept() {
        assert_eq!(sanitize("```true\n```"), "true");
        assert_eq!(sanitize("```42\n```"), "42");
        assert_eq!(sanitize("```\n42\n```"), "42");
        assert_eq!(sanitize("```json\n42\n```"), "42");
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "```json\n{}\n```",
            "``````",
            "`````x`",
            "````json\n{}",
            "  plain  ",
            "``` ```json\n```",
            "```true\n```",
            "```json\n```",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input: {input:?}");
            assert!(!once.contains("```"), "input: {input:?}");
        }
    }
}
