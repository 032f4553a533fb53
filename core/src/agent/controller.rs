//! The execution loop
//!
//! ```text
//! AwaitingModel -> Parsing -> [AwaitingConfirmation] -> Executing -> Observing
//!       ^                                                               |
//!       +------------------------ (not terminal) ----------------------+
//! ```
//!
//! Every path ends in a [`TerminalState`]. Nothing in here returns `Err`;
//! model, sanitiser and runner failures are folded into the report.

use super::events::{EventSink, LoopEvent, NullSink};
use super::gate::{ConfirmationGate, ConfirmationOutcome, ConfirmationRequest};
use crate::context::conversation::{error_signature, Session};
use crate::context::platform::PlatformFamily;
use crate::executor::safety::{RiskAssessment, RiskClassifier, RiskLevel};
use crate::executor::sanitizer::{CommandSanitizer, SanitizedCommand, MAX_COMMAND_LENGTH};
use crate::executor::{CommandRunner, ExecutionAttempt};
use crate::llm::ModelClient;
use crate::parser::StructuredOutputParser;
use crate::prompt::{PromptBuilder, DEFAULT_OBSERVATION_LIMIT};
use crate::protocol::ActionResponse;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop settings, resolved once before the controller is built.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// `None` means unbounded
    pub max_iterations: Option<u32>,
    /// Per-command limit; `None` means unbounded
    pub timeout: Option<Duration>,
    pub allow_sudo: bool,
    pub auto_confirm: bool,
    pub max_command_length: usize,
    pub observation_limit: usize,
    pub structured_output: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: Some(5),
            timeout: Some(Duration::from_secs(30)),
            allow_sudo: false,
            auto_confirm: false,
            max_command_length: MAX_COMMAND_LENGTH,
            observation_limit: DEFAULT_OBSERVATION_LIMIT,
            structured_output: true,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalState {
    Success,
    MaxIterationsReached,
    Blocked { command: String, reason: String },
    Declined { command: String },
    EndpointError { message: String },
    Cancelled,
}

impl TerminalState {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalState::Success)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::Success => write!(f, "success"),
            TerminalState::MaxIterationsReached => write!(f, "max iterations reached"),
            TerminalState::Blocked { .. } => write!(f, "blocked"),
            TerminalState::Declined { .. } => write!(f, "declined"),
            TerminalState::EndpointError { .. } => write!(f, "endpoint error"),
            TerminalState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Controller states.
#[derive(Debug, Clone)]
pub enum LoopState {
    AwaitingModel,
    Parsing {
        raw: String,
    },
    AwaitingConfirmation {
        response: ActionResponse,
        command: SanitizedCommand,
        assessment: RiskAssessment,
    },
    Executing {
        response: ActionResponse,
        command: SanitizedCommand,
        risk: RiskLevel,
        confirmed: bool,
    },
    Observing {
        response: ActionResponse,
        attempt: ExecutionAttempt,
        had_sudo_stripped: bool,
    },
    Terminal(TerminalState),
}

/// Result of one [`ExecutionController::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub terminal: TerminalState,
    /// Model rounds used
    pub iterations: u32,
    /// Commands executed during this run, in order
    pub attempts: Vec<ExecutionAttempt>,
    /// Human-readable outcome
    pub summary: String,
}

impl LoopReport {
    pub fn is_success(&self) -> bool {
        self.terminal.is_success()
    }
}

/// Drives one query to a terminal state.
pub struct ExecutionController {
    model: Arc<dyn ModelClient>,
    runner: Arc<dyn CommandRunner>,
    gate: Arc<dyn ConfirmationGate>,
    events: Arc<dyn EventSink>,
    parser: StructuredOutputParser,
    sanitizer: CommandSanitizer,
    classifier: RiskClassifier,
    prompt: PromptBuilder,
    config: LoopConfig,
}

impl ExecutionController {
    pub fn new(
        model: Arc<dyn ModelClient>,
        runner: Arc<dyn CommandRunner>,
        gate: Arc<dyn ConfirmationGate>,
        config: LoopConfig,
    ) -> Self {
        Self {
            model,
            runner,
            gate,
            events: Arc::new(NullSink),
            parser: StructuredOutputParser::new(),
            sanitizer: CommandSanitizer::new(config.max_command_length),
            classifier: RiskClassifier::new(),
            prompt: PromptBuilder::new(config.allow_sudo, config.observation_limit)
                .with_structured_output(config.structured_output),
            config,
        }
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    fn emit(&self, event: LoopEvent) {
        self.events.emit(&event);
    }

    fn iterations_exhausted(&self, session: &Session) -> bool {
        self.config
            .max_iterations
            .map(|max| session.iteration_count >= max)
            .unwrap_or(false)
    }

    /// Run `query` against `session` until a terminal state.
    ///
    /// Cancelling `cancel` aborts the current iteration only; turns and
    /// attempts recorded before it are kept.
    pub async fn run(
        &self,
        session: &mut Session,
        query: &str,
        cancel: &CancellationToken,
    ) -> LoopReport {
        session.iteration_count = 0;
        let attempts_before = session.conversation.attempts().len();

        if session.conversation.is_empty() && session.platform.family == PlatformFamily::Unknown {
            let message = format!(
                "Platform could not be identified ({}); no package-manager templates are available.",
                session.platform.detection_reason
            );
            warn!("{}", message);
            self.emit(LoopEvent::Warning {
                message: message.clone(),
            });
            session.conversation.push_observation(message);
        }

        session.conversation.push_user(query);
        info!(session = %session.id, "starting execution loop");

        let mut last_thinking = String::new();
        let mut state = LoopState::AwaitingModel;

        let terminal = loop {
            state = match state {
                LoopState::Terminal(terminal) => break terminal,
                LoopState::AwaitingModel => {
                    session.iteration_count += 1;
                    debug!(iteration = session.iteration_count, "awaiting model");
                    let request = self.prompt.build(session);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => LoopState::Terminal(TerminalState::Cancelled),
                        result = self.model.send(&request) => match result {
                            Ok(raw) => LoopState::Parsing { raw },
                            Err(e) => LoopState::Terminal(TerminalState::EndpointError {
                                message: e.to_string(),
                            }),
                        },
                    }
                }
                LoopState::Parsing { raw } => {
                    let response = self.parser.parse(&raw);
                    let canonical = serde_json::to_string(&response).unwrap_or_else(|_| raw.clone());
                    session.conversation.push_model(canonical);

                    if !response.thinking.trim().is_empty() {
                        last_thinking = response.thinking.clone();
                        self.emit(LoopEvent::Thinking {
                            text: response.thinking.clone(),
                        });
                    }
                    self.after_parse(session, response)
                }
                LoopState::AwaitingConfirmation {
                    response,
                    command,
                    assessment,
                } => {
                    let request = ConfirmationRequest {
                        command: command.text.clone(),
                        risk: assessment.level,
                        reason: assessment.reason.map(str::to_string),
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => LoopState::Terminal(TerminalState::Cancelled),
                        outcome = self.gate.confirm(&request) => match outcome {
                            ConfirmationOutcome::Approved => LoopState::Executing {
                                response,
                                command,
                                risk: assessment.level,
                                confirmed: true,
                            },
                            ConfirmationOutcome::Denied => {
                                info!(command = %command.text, "user declined command");
                                session.conversation.push_observation(format!(
                                    "The user declined to run `{}`.",
                                    command.text
                                ));
                                LoopState::Terminal(TerminalState::Declined {
                                    command: command.text,
                                })
                            }
                        },
                    }
                }
                LoopState::Executing {
                    response,
                    command,
                    risk,
                    confirmed,
                } => {
                    self.emit(LoopEvent::Executing {
                        command: command.text.clone(),
                        risk,
                    });
                    info!(command = %command.text, %risk, "executing command");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => LoopState::Terminal(TerminalState::Cancelled),
                        output = self.runner.run(&command.text, self.config.timeout) => {
                            let attempt = ExecutionAttempt::from_output(
                                session.iteration_count,
                                command.text.clone(),
                                risk,
                                confirmed,
                                output,
                            );
                            LoopState::Observing {
                                response,
                                attempt,
                                had_sudo_stripped: command.had_sudo_stripped,
                            }
                        }
                    }
                }
                LoopState::Observing {
                    response,
                    attempt,
                    had_sudo_stripped,
                } => {
                    self.emit(LoopEvent::Output {
                        stdout: attempt.stdout.clone(),
                        stderr: attempt.stderr.clone(),
                        exit_code: attempt.exit_code,
                        outcome: attempt.outcome,
                    });
                    self.observe(session, attempt, had_sudo_stripped);

                    if response.task_complete {
                        LoopState::Terminal(TerminalState::Success)
                    } else if self.iterations_exhausted(session) {
                        LoopState::Terminal(TerminalState::MaxIterationsReached)
                    } else {
                        LoopState::AwaitingModel
                    }
                }
            };
        };

        if terminal == TerminalState::Cancelled {
            session
                .conversation
                .push_observation("The previous step was interrupted by the user.");
        }

        let summary = summarize(&terminal, &last_thinking, session.iteration_count);
        info!(
            terminal = %terminal,
            iterations = session.iteration_count,
            "execution loop finished"
        );
        self.emit(LoopEvent::Verdict {
            terminal: terminal.clone(),
            summary: summary.clone(),
        });

        LoopReport {
            terminal,
            iterations: session.iteration_count,
            attempts: session.conversation.attempts()[attempts_before..].to_vec(),
            summary,
        }
    }

    fn after_parse(&self, session: &mut Session, response: ActionResponse) -> LoopState {
        let candidate = match response.command.as_deref() {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => {
                debug!(task_complete = response.task_complete, "no command proposed");
                return LoopState::Terminal(TerminalState::Success);
            }
        };

        let command = match self.sanitizer.sanitize(&candidate, self.config.allow_sudo) {
            Ok(command) => command,
            Err(rejection) => {
                warn!(command = %candidate, reason = %rejection.reason, "command rejected");
                self.emit(LoopEvent::Rejected {
                    command: candidate.clone(),
                    reason: rejection.reason.clone(),
                });
                session.conversation.push_observation(format!(
                    "Command `{}` was rejected before execution: {}. Propose a different command.",
                    candidate, rejection.reason
                ));
                // A rejected command never counts as finishing the task.
                return if self.iterations_exhausted(session) {
                    LoopState::Terminal(TerminalState::MaxIterationsReached)
                } else {
                    LoopState::AwaitingModel
                };
            }
        };

        if command.had_sudo_stripped {
            self.emit(LoopEvent::SudoStripped {
                original: candidate,
                command: command.text.clone(),
            });
        }

        let assessment = self.classifier.assess(&command.text);
        debug!(command = %command.text, level = %assessment.level, "classified command");
        match assessment.level {
            RiskLevel::Forbidden => {
                let reason = assessment.reason.unwrap_or("forbidden").to_string();
                warn!(command = %command.text, %reason, "command blocked");
                session.conversation.push_observation(format!(
                    "Command `{}` is forbidden and was not executed: {}.",
                    command.text, reason
                ));
                LoopState::Terminal(TerminalState::Blocked {
                    command: command.text,
                    reason,
                })
            }
            RiskLevel::Destructive if !self.config.auto_confirm => LoopState::AwaitingConfirmation {
                response,
                command,
                assessment,
            },
            level => LoopState::Executing {
                response,
                command,
                risk: level,
                confirmed: level == RiskLevel::Destructive,
            },
        }
    }

    fn observe(&self, session: &mut Session, attempt: ExecutionAttempt, had_sudo_stripped: bool) {
        let mut observation = self.prompt.describe_attempt(&attempt, had_sudo_stripped);

        if attempt.is_success() {
            if let Some(previous) = session.conversation.last_attempt() {
                let previous = previous.clone();
                session.learned_fixes.learn_from(&previous, &attempt);
            }
        } else if let Some(fix) = session.learned_fixes.lookup(&error_signature(&attempt)) {
            observation.push_str(&format!(
                "\nHint: a similar error was fixed earlier in this session with `{}`.",
                fix
            ));
        }

        session.conversation.record_attempt(attempt);
        session.conversation.push_observation(observation);
    }
}

fn summarize(terminal: &TerminalState, last_thinking: &str, iterations: u32) -> String {
    match terminal {
        TerminalState::Success => {
            if last_thinking.trim().is_empty() {
                "Task complete.".to_string()
            } else {
                last_thinking.trim().to_string()
            }
        }
        TerminalState::MaxIterationsReached => format!(
            "Stopped after {} iterations without completing the task.",
            iterations
        ),
        TerminalState::Blocked { command, reason } => {
            format!("Blocked `{}`: {}.", command, reason)
        }
        TerminalState::Declined { command } => format!("Declined to run `{}`.", command),
        TerminalState::EndpointError { message } => format!("could not reach model: {}", message),
        TerminalState::Cancelled => "Cancelled.".to_string(),
    }
}
