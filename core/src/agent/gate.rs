//! Confirmation gate for destructive commands

use crate::executor::safety::RiskLevel;
use async_trait::async_trait;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub command: String,
    pub risk: RiskLevel,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Approved,
    Denied,
}

/// Asks whether a destructive command may run.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationOutcome;
}

/// Approves everything (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _request: &ConfirmationRequest) -> ConfirmationOutcome {
        ConfirmationOutcome::Approved
    }
}

/// Denies everything. Used when nobody is there to answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDeny;

#[async_trait]
impl ConfirmationGate for AutoDeny {
    async fn confirm(&self, _request: &ConfirmationRequest) -> ConfirmationOutcome {
        ConfirmationOutcome::Denied
    }
}
