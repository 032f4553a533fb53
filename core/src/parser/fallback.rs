//! Heuristic recovery for replies that ignore the JSON contract.

use super::{clean_command, ParseStrategy};
use crate::protocol::ActionResponse;
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

lazy_static! {
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("valid regex");
    static ref LABEL_LINE: Regex =
        Regex::new(r"(?im)^[ \t]*(?:COMMAND|EXECUTE|RUN)[ \t]*:[ \t]*(\S.*?)[ \t]*$")
            .expect("valid regex");
    static ref COMMAND_KEY: Regex =
        Regex::new(r#""command"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex");
    static ref THINKING_KEY: Regex =
        Regex::new(r#""thinking"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex");
    static ref COMPLETION: Regex = Regex::new(
        r"(?i)\b(task (is )?complete[d]?|all done|i('| a)m done|finished|no further (action|command)s?( (is|are))? (needed|required))\b"
    )
    .expect("valid regex");
}

/// Data-format fences that never hold a shell command.
const NON_SHELL_FENCES: &[&str] = &["json", "yaml", "yml", "toml", "xml"];

/// Scans free text for a command.
///
/// The earliest explicit marker wins: either a fenced code block or a
/// `COMMAND:`/`EXECUTE:`/`RUN:` label line. A `"command": "..."` key is only
/// consulted when no explicit marker exists. This strategy always answers.
pub struct HeuristicStrategy;

impl ParseStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn parse(&self, raw: &str) -> Option<ActionResponse> {
        let explicit = earliest_marker(raw);

        let (command, thinking) = match explicit {
            Some((span, command)) => (clean_command(&command), prose_without(raw, span)),
            None => match COMMAND_KEY.captures(raw) {
                Some(caps) => {
                    let command = unescape_json_string(&caps[1]);
                    let thinking = THINKING_KEY
                        .captures(raw)
                        .map(|t| unescape_json_string(&t[1]))
                        .unwrap_or_else(|| raw.trim().to_string());
                    (clean_command(&command), thinking)
                }
                None => (None, raw.trim().to_string()),
            },
        };

        let task_complete = command.is_none() && COMPLETION.is_match(raw);

        Some(ActionResponse {
            thinking,
            command,
            task_complete,
            raw: raw.to_string(),
        })
    }
}

fn earliest_marker(raw: &str) -> Option<(Range<usize>, String)> {
    let fence = CODE_FENCE.captures_iter(raw).find_map(|caps| {
        let lang = caps[1].to_lowercase();
        if NON_SHELL_FENCES.contains(&lang.as_str()) {
            return None;
        }
        let whole = caps.get(0)?;
        Some((whole.range(), caps[2].trim().to_string()))
    });

    let label = LABEL_LINE.captures(raw).and_then(|caps| {
        let whole = caps.get(0)?;
        let command = caps[1].trim().trim_matches('`').trim().to_string();
        Some((whole.range(), command))
    });

    match (fence, label) {
        (Some(f), Some(l)) => Some(if f.0.start <= l.0.start { f } else { l }),
        (f, l) => f.or(l),
    }
}

fn prose_without(raw: &str, span: Range<usize>) -> String {
    let mut prose = String::with_capacity(raw.len());
    prose.push_str(raw[..span.start].trim_end());
    let tail = raw[span.end..].trim();
    if !tail.is_empty() {
        if !prose.is_empty() {
            prose.push('\n');
        }
        prose.push_str(tail);
    }
    prose.trim().to_string()
}

fn unescape_json_string(body: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", body)).unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ActionResponse {
        HeuristicStrategy.parse(raw).expect("heuristic always answers")
    }

    #[test]
    fn test_bash_fence() {
        let raw = "To see free space run:\n```bash\ndf -h\n```\nThat lists mounts.";
        let response = parse(raw);
        assert_eq!(response.command.as_deref(), Some("df -h"));
        assert_eq!(response.thinking, "To see free space run:\nThat lists mounts.");
        assert!(!response.task_complete);
    }

    #[test]
    fn test_first_fence_wins() {
        let raw = "```sh\nuptime\n```\nor maybe\n```sh\nw\n```";
        assert_eq!(parse(raw).command.as_deref(), Some("uptime"));
    }

    #[test]
    fn test_json_fence_skipped() {
        let raw = "```json\n{\"a\": 1}\n```\n```bash\nls\n```";
        assert_eq!(parse(raw).command.as_deref(), Some("ls"));
    }

    #[test]
    fn test_label_line_before_fence_wins() {
        let raw = "EXECUTE: `whoami`\n\n```bash\nid\n```";
        assert_eq!(parse(raw).command.as_deref(), Some("whoami"));
    }

    #[test]
    fn test_run_label_case_insensitive() {
        let raw = "I will check the kernel.\nrun: uname -r";
        let response = parse(raw);
        assert_eq!(response.command.as_deref(), Some("uname -r"));
        assert_eq!(response.thinking, "I will check the kernel.");
    }

    #[test]
    fn test_json_key_only_without_marker() {
        let raw = r#"{"thinking": "look \"here\"", "command": "grep -r \"x\" .", "#;
        let response = parse(raw);
        assert_eq!(response.command.as_deref(), Some(r#"grep -r "x" ."#));
        assert_eq!(response.thinking, r#"look "here""#);
    }

    #[test]
    fn test_marker_beats_json_key() {
        let raw = "{\"command\": \"rm x\"\nCOMMAND: ls";
        assert_eq!(parse(raw).command.as_deref(), Some("ls"));
    }

    #[test]
    fn test_completion_language_without_command() {
        let response = parse("The disk has 40GB free. Task complete.");
        assert!(response.task_complete);
        assert_eq!(response.command, None);
    }

    #[test]
    fn test_prose_without_completion_is_not_complete() {
        let response = parse("Which directory should I look in?");
        assert!(!response.task_complete);
        assert_eq!(response.thinking, "Which directory should I look in?");
    }

    #[test]
    fn test_completion_word_with_command_still_runs() {
        let raw = "Once finished we verify.\nCOMMAND: ls /tmp";
        let response = parse(raw);
        assert_eq!(response.command.as_deref(), Some("ls /tmp"));
        assert!(!response.task_complete);
    }

    #[test]
    fn test_empty_label_ignored() {
        let response = parse("COMMAND:\nnothing to do");
        assert_eq!(response.command, None);
    }
}
