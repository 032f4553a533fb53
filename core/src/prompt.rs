//! Prompt construction
//!
//! Serialises a [`Session`] into the chat messages sent for the next model
//! round: a system prompt followed by the conversation turns.

use crate::context::conversation::{Role, Session};
use crate::context::platform::{render_template, PlatformInfo};
use crate::executor::{ExecutionAttempt, ExecutionOutcome};
use crate::llm::{ChatMessage, ChatRequest};
use crate::protocol::response_schema;

/// Default character budget per turn.
pub const DEFAULT_OBSERVATION_LIMIT: usize = 4000;

/// How many learned fixes are shown to the model at most.
const MAX_HINTS: usize = 5;

const ROLE_SECTION: &str = r#"You are a Linux command-line automation assistant. You solve the user's request by proposing one shell command at a time, reading its output, and continuing until the task is done.

Respond ONLY with a JSON object of this exact shape:
{
  "thinking": "your reasoning, analysis of the last output, or the final answer for the user",
  "command": "one Linux shell command to run next, or null",
  "task_complete": true or false
}"#;

const RULES_SECTION: &str = r#"RULES:
1. Provide Linux/bash commands only. Never suggest Windows or macOS-only commands.
2. Propose at most one command per reply, without code fences or placeholders like <file>.
3. If the request is informational and you already know the answer, put it in "thinking", set "command" to null and "task_complete" to true.
4. After each command you receive an Observation with the exit code and output. On success, analyse it and continue or finish. On failure, explain the error in "thinking" and propose a corrected command.
5. Set "task_complete" to true only when nothing else needs to run.
6. Never propose destructive commands such as deleting system directories, formatting disks or fork bombs. Explain the risk instead.
7. Reply in the language the user writes in."#;

/// Builds model requests from session state.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    allow_sudo: bool,
    observation_limit: usize,
    structured_output: bool,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            allow_sudo: false,
            observation_limit: DEFAULT_OBSERVATION_LIMIT,
            structured_output: true,
        }
    }
}

impl PromptBuilder {
    pub fn new(allow_sudo: bool, observation_limit: usize) -> Self {
        Self {
            allow_sudo,
            observation_limit,
            structured_output: true,
        }
    }

    pub fn with_structured_output(mut self, enabled: bool) -> Self {
        self.structured_output = enabled;
        self
    }

    pub fn observation_limit(&self) -> usize {
        self.observation_limit
    }

    pub fn system_prompt(&self, session: &Session) -> String {
        let mut sections = vec![
            ROLE_SECTION.to_string(),
            self.sudo_section(),
            platform_section(&session.platform),
        ];

        if !session.learned_fixes.is_empty() {
            let mut hints = String::from(
                "FIXES THAT WORKED EARLIER IN THIS SESSION (hints only, adapt as needed):",
            );
            for (error, fix) in session.learned_fixes.iter().take(MAX_HINTS) {
                hints.push_str(&format!("\n- error \"{}\" was fixed by `{}`", error, fix));
            }
            sections.push(hints);
        }

        if let Some(context) = &session.local_context {
            sections.push(format!(
                "LOCAL CONTEXT (files on the user's machine, use them to answer questions about the project):\n{}",
                context
            ));
        }

        sections.push(RULES_SECTION.to_string());
        sections.join("\n\n")
    }

    fn sudo_section(&self) -> String {
        if self.allow_sudo {
            "SUDO: enabled. Prefix commands with sudo when root privileges are required.".to_string()
        } else {
            "SUDO: disabled. Do not use sudo; any sudo prefix is removed before execution and the command runs unprivileged. \
             If root is truly required, say so in \"thinking\" and tell the user to re-run with --sudo."
                .to_string()
        }
    }

    /// Full request for the next round.
    pub fn build(&self, session: &Session) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(self.system_prompt(session))];
        for turn in session.conversation.turns() {
            let content = truncate_middle(&turn.content, self.observation_limit);
            messages.push(match turn.role {
                Role::User => ChatMessage::user(content),
                Role::Model => ChatMessage::assistant(content),
                Role::Observation => ChatMessage::user(format!("Observation: {}", content)),
            });
        }

        let request = ChatRequest::new(messages);
        if self.structured_output {
            request.with_schema(response_schema())
        } else {
            request
        }
    }

    /// Observation text for an executed attempt.
    pub fn describe_attempt(&self, attempt: &ExecutionAttempt, had_sudo_stripped: bool) -> String {
        let half = self.observation_limit / 2;
        let mut text = match attempt.outcome {
            ExecutionOutcome::Completed => format!(
                "Command `{}` exited with code {}.",
                attempt.command,
                attempt
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none (killed by signal)".to_string())
            ),
            ExecutionOutcome::TimedOut => format!(
                "Command `{}` timed out after {:.1}s and was killed.",
                attempt.command,
                attempt.duration.as_secs_f64()
            ),
            ExecutionOutcome::SpawnFailed => {
                format!("Command `{}` could not be started.", attempt.command)
            }
        };
        if had_sudo_stripped {
            text.push_str(" Note: sudo was removed, the command ran without root privileges.");
        }
        if !attempt.stdout.trim().is_empty() {
            text.push_str("\nstdout:\n");
            text.push_str(&truncate_middle(attempt.stdout.trim_end(), half));
        }
        if !attempt.stderr.trim().is_empty() {
            text.push_str("\nstderr:\n");
            text.push_str(&truncate_middle(attempt.stderr.trim_end(), half));
        }
        if attempt.stdout.trim().is_empty() && attempt.stderr.trim().is_empty() {
            text.push_str("\n(no output)");
        }
        text
    }
}

fn platform_section(platform: &PlatformInfo) -> String {
    let templates = platform.templates();
    if templates.is_empty() {
        return format!(
            "PLATFORM: {} (family unknown). No package-manager templates are known; \
             detect the package manager before installing anything.",
            platform.distribution
        );
    }
    let mut section = format!(
        "PLATFORM: {} ({} family{}). Package-manager commands:",
        platform.distribution,
        platform.family,
        platform
            .version
            .as_deref()
            .map(|v| format!(", version {}", v))
            .unwrap_or_default()
    );
    for (intent, template) in templates {
        section.push_str(&format!(
            "\n- {}: `{}`",
            intent,
            render_template(template, "<package>")
        ));
    }
    section
}

/// Keep the head and tail of `text` within `limit` characters.
pub fn truncate_middle(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let head = limit / 2;
    let tail = limit - head;
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(total - tail).collect();
    format!(
        "{}\n... [{} characters omitted] ...\n{}",
        start,
        total - head - tail,
        end
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::platform::PlatformFamily;
    use crate::executor::safety::RiskLevel;
    use crate::executor::RunOutput;
    use crate::llm::MessageRole;

    fn debian() -> PlatformInfo {
        PlatformInfo {
            family: PlatformFamily::Debian,
            distribution: "Debian GNU/Linux".to_string(),
            version: Some("12".to_string()),
            detection_reason: "test".to_string(),
            kernel: None,
            os_long: None,
        }
    }

    #[test]
    fn test_message_roles_and_order() {
        let mut session = Session::new(debian());
        session.conversation.push_user("disk usage?");
        session.conversation.push_model("{\"thinking\":\"\",\"command\":\"df -h\",\"task_complete\":false}");
        session.conversation.push_observation("exit 0");

        let request = PromptBuilder::default().build(&session);
        let roles: Vec<_> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User
            ]
        );
        assert_eq!(request.messages[3].content, "Observation: exit 0");
        assert!(request.schema.is_some());
    }

    #[test]
    fn test_system_prompt_sections() {
        let mut session = Session::new(debian());
        session
            .learned_fixes
            .record("E: Unable to locate package", "apt-get update");
        let prompt = PromptBuilder::new(false, 100).system_prompt(&session);

        let role = prompt.find("\"task_complete\"").unwrap();
        let sudo = prompt.find("SUDO: disabled").unwrap();
        let platform = prompt.find("PLATFORM: Debian GNU/Linux").unwrap();
        let fixes = prompt.find("FIXES THAT WORKED").unwrap();
        let rules = prompt.find("RULES:").unwrap();
        assert!(role < sudo && sudo < platform && platform < fixes && fixes < rules);
        assert!(prompt.contains("apt-get install -y <package>"));
        assert!(prompt.contains("`apt-get update`"));
    }

    #[test]
    fn test_local_context_section() {
        let mut session = Session::new(debian());
        let prompt = PromptBuilder::default().system_prompt(&session);
        assert!(!prompt.contains("LOCAL CONTEXT"));

        session.local_context = Some("CONTEXT ATTACHMENTS for /srv/app:\nDetected languages: Go".to_string());
        let prompt = PromptBuilder::default().system_prompt(&session);
        let context = prompt.find("LOCAL CONTEXT").unwrap();
        assert!(context < prompt.find("RULES:").unwrap());
        assert!(prompt.contains("Detected languages: Go"));

        session.reset();
        assert!(session.local_context.is_none());
    }

    #[test]
    fn test_unknown_platform_section() {
        let session = Session::new(PlatformInfo::unknown("test"));
        let prompt = PromptBuilder::new(true, 100).system_prompt(&session);
        assert!(prompt.contains("family unknown"));
        assert!(prompt.contains("SUDO: enabled"));
    }

    #[test]
    fn test_turns_truncated() {
        let mut session = Session::new(debian());
        session.conversation.push_observation("x".repeat(500));
        let request = PromptBuilder::new(false, 100).build(&session);
        let content = &request.messages[1].content;
        assert!(content.contains("[400 characters omitted]"));
        assert!(content.len() < 200);
    }

    #[test]
    fn test_unstructured_has_no_schema() {
        let session = Session::new(debian());
        let request = PromptBuilder::default()
            .with_structured_output(false)
            .build(&session);
        assert!(request.schema.is_none());
    }

    #[test]
    fn test_describe_attempt() {
        let builder = PromptBuilder::default();
        let attempt = ExecutionAttempt::from_output(
            2,
            "dnf install nginx",
            RiskLevel::Safe,
            false,
            RunOutput::completed(1, "", "Error: This command has to be run with superuser privileges\n"),
        );
        let text = builder.describe_attempt(&attempt, true);
        assert!(text.starts_with("Command `dnf install nginx` exited with code 1."));
        assert!(text.contains("sudo was removed"));
        assert!(text.contains("stderr:\nError: This command"));
        assert!(!text.contains("stdout:"));
    }

    #[test]
    fn test_truncate_middle_keeps_short_text() {
        assert_eq!(truncate_middle("short", 10), "short");
        let long = truncate_middle("abcdefghij", 4);
        assert!(long.starts_with("ab\n"));
        assert!(long.ends_with("\nij"));
    }
}
