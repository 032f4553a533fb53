//! Output formatting
//!
//! Renders loop events and platform details as styled terminal text.

use crate::agent::{EventSink, LoopEvent, TerminalState};
use crate::context::platform::PlatformInfo;
use crate::executor::ExecutionOutcome;
use crate::executor::safety::RiskLevel;
use console::Style;
use std::fmt::Write as _;

/// Event renderer for the terminal
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    blue: Style,
    green: Style,
    yellow: Style,
    red: Style,
    dim: Style,
    bold: Style,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self {
            blue: Style::new().blue(),
            green: Style::new().green(),
            yellow: Style::new().yellow(),
            red: Style::new().red(),
            dim: Style::new().dim(),
            bold: Style::new().bold(),
        }
    }
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text for one event, or `None` when there is nothing to show.
    pub fn render(&self, event: &LoopEvent) -> Option<String> {
        let text = match event {
            LoopEvent::Thinking { text } => {
                if text.trim().is_empty() {
                    return None;
                }
                format!("{} {}", self.blue.apply_to("Thinking:"), text.trim())
            }
            LoopEvent::SudoStripped { original, command } => format!(
                "{} `{}` -> `{}`",
                self.yellow.apply_to("sudo removed:"),
                original,
                command
            ),
            LoopEvent::Executing { command, risk } => {
                let label = match risk {
                    RiskLevel::Safe => self.green.apply_to("$"),
                    RiskLevel::Destructive => self.yellow.apply_to("$"),
                    RiskLevel::Forbidden => self.red.apply_to("$"),
                };
                format!("{} {}", label, self.bold.apply_to(command))
            }
            LoopEvent::Output {
                stdout,
                stderr,
                exit_code,
                outcome,
            } => self.render_output(stdout, stderr, *exit_code, *outcome),
            LoopEvent::Rejected { command, reason } => format!(
                "{} `{}`: {}",
                self.red.apply_to("Rejected"),
                command,
                reason
            ),
            LoopEvent::Warning { message } => {
                format!("{} {}", self.yellow.apply_to("Warning:"), message)
            }
            LoopEvent::Verdict { terminal, summary } => {
                let style = match terminal {
                    TerminalState::Success => &self.green,
                    TerminalState::MaxIterationsReached | TerminalState::Cancelled => &self.yellow,
                    _ => &self.red,
                };
                format!("\n{}", style.apply_to(summary))
            }
        };
        Some(text)
    }

    fn render_output(
        &self,
        stdout: &str,
        stderr: &str,
        exit_code: Option<i32>,
        outcome: ExecutionOutcome,
    ) -> String {
        let mut out = String::new();
        if !stdout.trim().is_empty() {
            let _ = writeln!(out, "{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            let _ = writeln!(out, "{}", self.red.apply_to(stderr.trim_end()));
        }
        let status = match (outcome, exit_code) {
            (ExecutionOutcome::TimedOut, _) => self.red.apply_to("timed out".to_string()),
            (ExecutionOutcome::SpawnFailed, _) => self.red.apply_to("could not start".to_string()),
            (ExecutionOutcome::Completed, Some(0)) => self.dim.apply_to("exit 0".to_string()),
            (ExecutionOutcome::Completed, Some(code)) => {
                self.red.apply_to(format!("exit {}", code))
            }
            (ExecutionOutcome::Completed, None) => self.red.apply_to("killed".to_string()),
        };
        let _ = write!(out, "{}", status);
        out
    }

    /// Platform summary for `--platform-info`.
    pub fn render_platform(&self, info: &PlatformInfo) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.bold.apply_to("Platform:"));
        let _ = writeln!(out, "  Family: {}", self.green.apply_to(info.family));
        let _ = writeln!(
            out,
            "  Distribution: {} {}",
            info.distribution,
            info.version.as_deref().unwrap_or("")
        );
        match info.family.package_manager() {
            Some(pm) => {
                let _ = writeln!(out, "  Package manager: {}", pm);
            }
            None => {
                let _ = writeln!(out, "  Package manager: {}", self.yellow.apply_to("unknown"));
            }
        }
        if let Some(kernel) = &info.kernel {
            let _ = writeln!(out, "  Kernel: {}", kernel);
        }
        let _ = writeln!(out, "  Detected via: {}", self.dim.apply_to(&info.detection_reason));

        let templates = info.templates();
        if !templates.is_empty() {
            let _ = writeln!(out, "{}", self.bold.apply_to("Templates:"));
            for (intent, template) in templates {
                let _ = writeln!(out, "  {:<8} {}", intent.to_string(), template);
            }
        }
        out.trim_end().to_string()
    }
}

impl EventSink for OutputFormatter {
    fn emit(&self, event: &LoopEvent) {
        let Some(text) = self.render(event) else {
            return;
        };
        match event {
            LoopEvent::Warning { .. } | LoopEvent::Rejected { .. } => eprintln!("{}", text),
            _ => println!("{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::platform::PlatformFamily;

    fn plain(text: Option<String>) -> String {
        console::strip_ansi_codes(&text.unwrap_or_default()).into_owned()
    }

    #[test]
    fn test_render_events() {
        let fmt = OutputFormatter::new();

        let thinking = plain(fmt.render(&LoopEvent::Thinking {
            text: "checking disk".into(),
        }));
        assert_eq!(thinking, "Thinking: checking disk");

        let exec = plain(fmt.render(&LoopEvent::Executing {
            command: "df -h".into(),
            risk: RiskLevel::Safe,
        }));
        assert_eq!(exec, "$ df -h");

        let output = plain(fmt.render(&LoopEvent::Output {
            stdout: "ok\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            outcome: ExecutionOutcome::Completed,
        }));
        assert_eq!(output, "ok\nexit 0");

        let timeout = plain(fmt.render(&LoopEvent::Output {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            outcome: ExecutionOutcome::TimedOut,
        }));
        assert_eq!(timeout, "timed out");
    }

    #[test]
    fn test_empty_thinking_is_skipped() {
        let fmt = OutputFormatter::new();
        assert!(fmt
            .render(&LoopEvent::Thinking {
                text: "  ".into()
            })
            .is_none());
    }

    #[test]
    fn test_render_platform() {
        let fmt = OutputFormatter::new();
        let info = PlatformInfo::from_os_release("ID=fedora\nVERSION_ID=40\n").unwrap();
        let text = console::strip_ansi_codes(&fmt.render_platform(&info)).into_owned();
        assert!(text.contains("Family: RHEL"));
        assert!(text.contains("Package manager: dnf"));
        assert!(text.contains("dnf install -y {package}"));

        let unknown = PlatformInfo::unknown("no os-release");
        assert_eq!(unknown.family, PlatformFamily::Unknown);
        let text = console::strip_ansi_codes(&fmt.render_platform(&unknown)).into_owned();
        assert!(text.contains("Package manager: unknown"));
        assert!(!text.contains("Templates:"));
    }
}
