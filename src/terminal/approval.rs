//! Interactive confirmation for destructive commands

use async_trait::async_trait;
use cla_core::agent::{ConfirmationGate, ConfirmationOutcome, ConfirmationRequest};
use console::Style;
use dialoguer::Confirm;
use tracing::warn;

/// Asks on the terminal with a `[y/N]` prompt. Anything but an explicit
/// yes, including a read error, is a denial.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmation;

pub fn prompt_text(request: &ConfirmationRequest) -> String {
    let yellow = Style::new().yellow();
    match &request.reason {
        Some(reason) => format!(
            "{} `{}` ({}). Run it?",
            yellow.apply_to(request.risk.to_string()),
            request.command,
            reason
        ),
        None => format!(
            "{} `{}`. Run it?",
            yellow.apply_to(request.risk.to_string()),
            request.command
        ),
    }
}

#[async_trait]
impl ConfirmationGate for TerminalConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationOutcome {
        let prompt = prompt_text(request);
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(true)) => ConfirmationOutcome::Approved,
            Ok(Ok(false)) => ConfirmationOutcome::Denied,
            Ok(Err(e)) => {
                warn!(error = %e, "confirmation prompt failed");
                ConfirmationOutcome::Denied
            }
            Err(e) => {
                warn!(error = %e, "confirmation task failed");
                ConfirmationOutcome::Denied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cla_core::executor::safety::RiskLevel;

    #[test]
    fn test_prompt_names_command_and_reason() {
        let request = ConfirmationRequest {
            command: "rm -rf build".to_string(),
            risk: RiskLevel::Destructive,
            reason: Some("removes files".to_string()),
        };
        let text = console::strip_ansi_codes(&prompt_text(&request)).into_owned();
        assert_eq!(text, "destructive `rm -rf build` (removes files). Run it?");
    }
}
