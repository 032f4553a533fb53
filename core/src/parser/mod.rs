//! Structured output parser for model replies
//!
//! Turns raw model text into an [`ActionResponse`]. Two strategies run in a
//! fixed order: the declared JSON contract first, then a heuristic scan of
//! free text. Parsing is total: malformed input degrades to a best-effort
//! response and never fails.

mod fallback;

pub use fallback::HeuristicStrategy;

use crate::protocol::{ActionResponse, ResponseContract};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

/// A single way of interpreting model output.
///
/// Implementors are pure: no IO, no async, no state between calls.
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `None` when this strategy does not recognise the text.
    fn parse(&self, raw: &str) -> Option<ActionResponse>;
}

/// Schema-first parser with a heuristic fallback.
pub struct StructuredOutputParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for StructuredOutputParser {
    fn default() -> Self {
        Self {
            strategies: vec![Box::new(SchemaStrategy), Box::new(HeuristicStrategy)],
        }
    }
}

impl StructuredOutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, raw: &str) -> ActionResponse {
        if raw.trim().is_empty() {
            return ActionResponse::empty(raw);
        }

        for strategy in &self.strategies {
            if let Some(response) = strategy.parse(raw) {
                debug!(
                    strategy = strategy.name(),
                    has_command = response.has_command(),
                    task_complete = response.task_complete,
                    "parsed model response"
                );
                return response;
            }
        }

        // Heuristic strategy always answers; this only guards custom chains.
        ActionResponse {
            thinking: raw.trim().to_string(),
            command: None,
            task_complete: false,
            raw: raw.to_string(),
        }
    }
}

/// Parses the declared `{thinking, command, task_complete}` contract.
///
/// Tries the whole text, then fenced ```json blocks, then balanced `{...}`
/// objects embedded in prose.
pub struct SchemaStrategy;

impl ParseStrategy for SchemaStrategy {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn parse(&self, raw: &str) -> Option<ActionResponse> {
        let trimmed = raw.trim();
        let candidates = std::iter::once(trimmed.to_string())
            .chain(extract_json_code_blocks(raw))
            .chain(extract_json_objects(raw));

        for candidate in candidates {
            if let Some(contract) = parse_contract(&candidate) {
                let mut response = contract.into_action(raw);
                response.command = response.command.as_deref().and_then(clean_command);
                return Some(response);
            }
        }
        None
    }
}

fn parse_contract(candidate: &str) -> Option<ResponseContract> {
    let candidate = candidate.trim();
    if !candidate.starts_with('{') {
        return None;
    }
    serde_json::from_str::<ResponseContract>(candidate)
        .ok()
        .or_else(|| {
            // Some models emit literal newlines inside string values.
            let normalized = escape_unescaped_newlines_in_json_strings(candidate);
            serde_json::from_str::<ResponseContract>(&normalized).ok()
        })
}

lazy_static! {
    static ref FENCE_WRAPPER: Regex =
        Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)\r?\n?```$").expect("valid regex");
    static ref PLACEHOLDER: Regex = Regex::new(
        r"(?i)^(no code block|no command( needed)?|none|null|n/a|nothing)\.?$|^\((?:no|none|n/a|nothing)\b[^)]*\)$|^(asking|please|i will|let me|you should|we need|this is|that is)\b"
    )
    .expect("valid regex");
}

/// Normalise a candidate command taken from model output.
///
/// Strips code fences and surrounding backticks; discards blanks and
/// conversational placeholders such as `"No command"`.
pub fn clean_command(command: &str) -> Option<String> {
    let mut text = command.trim().to_string();
    if let Some(caps) = FENCE_WRAPPER.captures(&text) {
        text = caps[1].trim().to_string();
    }
    if text.len() >= 2 && text.starts_with('`') && text.ends_with('`') && !text.starts_with("``") {
        text = text[1..text.len() - 1].trim().to_string();
    }
    if text.is_empty() || PLACEHOLDER.is_match(&text) {
        return None;
    }
    Some(text)
}

/// Extract JSON objects from text using brace balancing
///
/// Handles nested braces and escaped quotes within strings.
pub fn extract_json_objects(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut depth: i32 = 0;
    let mut start: Option<usize> = None;

    for (i, ch) in content.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            out.push(content[s..=i].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    out
}

/// Extract ```json ... ``` blocks.
fn extract_json_code_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let lower = content.to_lowercase();
    let mut search_from = 0usize;

    while let Some(rel_start) = lower[search_from..].find("```json") {
        let after_tag = search_from + rel_start + "```json".len();
        let content_start = match content[after_tag..].find('\n') {
            Some(rel_nl) => after_tag + rel_nl + 1,
            None => break,
        };
        match content[content_start..].find("```") {
            Some(rel_end) => {
                let content_end = content_start + rel_end;
                blocks.push(content[content_start..content_end].trim().to_string());
                search_from = content_end + 3;
            }
            None => break,
        }
    }

    blocks
}

/// Convert invalid JSON containing literal newlines inside string values into valid JSON.
///
/// Only escapes `\n`/`\r` when inside a JSON string literal.
fn escape_unescaped_newlines_in_json_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;

    for ch in input.chars() {
        if in_string {
            if escape {
                out.push(ch);
                escape = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push(ch);
                    escape = true;
                }
                '"' => {
                    out.push(ch);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
            if ch == '"' {
                in_string = true;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StructuredOutputParser {
        StructuredOutputParser::new()
    }

    #[test]
    fn test_parses_declared_schema() {
        let raw = r#"{"thinking": "Check disk usage", "command": "df -h", "task_complete": false}"#;
        let response = parser().parse(raw);
        assert_eq!(response.thinking, "Check disk usage");
        assert_eq!(response.command.as_deref(), Some("df -h"));
        assert!(!response.task_complete);
        assert_eq!(response.raw, raw);
    }

    #[test]
    fn test_schema_null_command_and_complete() {
        let raw = r#"{"thinking": "All done, disk is fine.", "command": null, "task_complete": true}"#;
        let response = parser().parse(raw);
        assert_eq!(response.command, None);
        assert!(response.task_complete);
    }

    #[test]
    fn test_schema_inside_prose_and_fence() {
        let raw = "Here you go:\n```json\n{\"thinking\": \"list\", \"command\": \"ls -la\", \"task_complete\": false}\n```\n";
        let response = parser().parse(raw);
        assert_eq!(response.command.as_deref(), Some("ls -la"));
        assert_eq!(response.thinking, "list");
    }

    #[test]
    fn test_schema_command_with_fence_markers_is_cleaned() {
        let raw = r#"{"thinking": "t", "command": "```bash\nuname -a\n```", "task_complete": false}"#;
        let response = parser().parse(raw);
        assert_eq!(response.command.as_deref(), Some("uname -a"));
    }

    #[test]
    fn test_schema_placeholder_command_is_none() {
        let raw = r#"{"thinking": "Which file do you mean?", "command": "No command", "task_complete": false}"#;
        let response = parser().parse(raw);
        assert_eq!(response.command, None);
    }

    #[test]
    fn test_subshell_command_is_kept() {
        let raw = r#"{"thinking": "list tmp", "command": "(cd /tmp && ls)", "task_complete": false}"#;
        let response = parser().parse(raw);
        assert_eq!(response.command.as_deref(), Some("(cd /tmp && ls)"));
        assert_eq!(clean_command("(none needed)"), None);
        assert_eq!(clean_command("(N/A)"), None);
    }

    #[test]
    fn test_literal_newlines_in_strings() {
        let raw = "{\"thinking\": \"line one\nline two\", \"command\": \"pwd\", \"task_complete\": false}";
        let response = parser().parse(raw);
        assert_eq!(response.thinking, "line one\nline two");
        assert_eq!(response.command.as_deref(), Some("pwd"));
    }

    #[test]
    fn test_empty_response_is_complete() {
        let response = parser().parse("   \n  ");
        assert!(response.task_complete);
        assert_eq!(response.command, None);
    }

    #[test]
    fn test_malformed_json_falls_back_to_command_marker() {
        let raw = "{\"thinking\": \"I should check memory\", \"command\": \nThe JSON broke, so here it is.\nCOMMAND: free -m\n";
        let response = parser().parse(raw);
        assert_eq!(response.command.as_deref(), Some("free -m"));
        assert!(!response.task_complete);
    }

    #[test]
    fn test_partial_schema_is_not_accepted() {
        // task_complete missing: not a conforming contract value.
        let raw = r#"{"thinking": "x", "command": "ls"}"#;
        let response = parser().parse(raw);
        assert!(!response.task_complete);
        // Recovered by the fallback's key scan.
        assert_eq!(response.command.as_deref(), Some("ls"));
    }

    #[test]
    fn test_extract_json_objects_nested() {
        let content = r#"text {"outer": {"inner": "}"}} tail {"n": 1}"#;
        let objects = extract_json_objects(content);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0], r#"{"outer": {"inner": "}"}}"#);
    }

    #[test]
    fn test_clean_command_rules() {
        assert_eq!(clean_command("`ls -l`").as_deref(), Some("ls -l"));
        assert_eq!(clean_command("  null "), None);
        assert_eq!(clean_command("(No code block)"), None);
        assert_eq!(clean_command("Let me check that for you"), None);
        assert_eq!(clean_command("echo hi").as_deref(), Some("echo hi"));
    }

    #[test]
    fn test_never_panics_on_garbage() {
        let inputs = [
            "{{{{",
            "}}}}",
            "```",
            "```bash",
            "\"\\",
            "COMMAND:",
            "\u{0}\u{1}\u{2}",
            "{\"command\": \"\\u12\"}",
        ];
        for input in inputs {
            let _ = parser().parse(input);
        }
    }
}
