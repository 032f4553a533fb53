//! Core of the command-line assistant: turns a natural-language request
//! into shell commands, runs them and feeds the results back to the model
//! until the task is done or a limit is hit.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod llm;
pub mod output;
pub mod parser;
pub mod prompt;
pub mod protocol;

// Re-exports for convenience
pub use agent::{ExecutionController, LoopConfig, LoopReport, TerminalState};
pub use config::Settings;
pub use context::Session;
pub use error::{ClaError, ModelError, Result};
