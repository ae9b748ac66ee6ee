//! Text cleanup applied around language-model calls.
//!
//! Page markdown is stripped down to plain text before extraction, and model
//! answers are unwrapped from code fences before JSON parsing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Page content
// ---------------------------------------------------------------------------

/// Ordered `(pattern, replacement)` passes for [`clean_content`].
static CONTENT_PASSES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // heading markers
        (r"(?m)^#+\s", ""),
        // emphasis
        (r"\*\*([^*]+)\*\*", "$1"),
        (r"\*([^*]+)\*", "$1"),
        (r"__([^_]+)__", "$1"),
        (r"_([^_]+)_", "$1"),
        // links keep their text
        (r"\[([^\]]+)\]\(([^)]+)\)", "$1"),
        (r"https?://\S+", ""),
        // fenced then inline code
        (r"```[\s\S]*?```", ""),
        (r"`([^`]+)`", "$1"),
        // list markers
        (r"(?m)^\s*[-*]\s", ""),
        (r"(?m)^\s*\d+\.\s", ""),
        // blank-line runs
        (r"\n\s*\n", "\n"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), replacement))
    .collect()
});

/// Reduce page markdown to plain text for the extraction prompt.
pub fn clean_content(markdown: &str) -> String {
    let mut text = markdown.to_string();
    for (re, replacement) in CONTENT_PASSES.iter() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}

// ---------------------------------------------------------------------------
// Model output
// ---------------------------------------------------------------------------

/// Remove a leading ```` ```lang ```` fence line and a trailing ```` ``` ````.
pub fn strip_code_fences(output: &str) -> String {
    static OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^```(\w+)?\s*\n").expect("valid regex"));
    static CLOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)\n```$").expect("valid regex"));

    let text = OPEN_RE.replace_all(output, "");
    let text = CLOSE_RE.replace_all(&text, "");
    text.trim().to_string()
}

/// The span from the first `{` to the last `}`, or the input unchanged.
pub fn extract_json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parse a fence-stripped model answer as a JSON object.
pub fn parse_json_object(
    text: &str,
) -> std::result::Result<serde_json::Map<String, Value>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Render a `{name, subcategories}` tree as an indented `- name` outline.
pub fn format_outline(categories: &[Value]) -> Vec<String> {
    let mut lines = Vec::new();
    push_outline(categories, 0, &mut lines);
    lines
}

fn push_outline(categories: &[Value], level: usize, lines: &mut Vec<String>) {
    for category in categories {
        let name = category
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>");
        lines.push(format!("{}- {name}", "  ".repeat(level)));
        if let Some(children) = category.get("subcategories").and_then(Value::as_array) {
            push_outline(children, level + 1, lines);
        }
    }
}
