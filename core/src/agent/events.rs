use super::controller::TerminalState;
use crate::executor::safety::RiskLevel;
use crate::executor::ExecutionOutcome;
use serde::Serialize;

/// Presentation events emitted by the controller.
///
/// Within one iteration they arrive in the order thinking, command, output;
/// the verdict comes last, once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Thinking {
        text: String,
    },
    SudoStripped {
        original: String,
        command: String,
    },
    Executing {
        command: String,
        risk: RiskLevel,
    },
    Output {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        outcome: ExecutionOutcome,
    },
    Rejected {
        command: String,
        reason: String,
    },
    Warning {
        message: String,
    },
    Verdict {
        terminal: TerminalState,
        summary: String,
    },
}

/// Receives [`LoopEvent`]s. Implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LoopEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LoopEvent) {}
}
