//! Execution loop
//!
//! - `controller`: the state machine that turns a query into commands
//! - `gate`: confirmation for destructive commands
//! - `events`: presentation events for a renderer

pub mod controller;
pub mod events;
pub mod gate;


pub use controller::{ExecutionController, LoopConfig, LoopReport, LoopState, TerminalState};
pub use events::{EventSink, LoopEvent, NullSink};
pub use gate::{AutoApprove, AutoDeny, ConfirmationGate, ConfirmationOutcome, ConfirmationRequest};
