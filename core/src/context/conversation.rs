//! Conversation history, learned fixes and the per-user session

use super::platform::PlatformInfo;
use crate::executor::{ExecutionAttempt, ExecutionOutcome};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Longest error signature kept as a learning key.
pub const SIGNATURE_LENGTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Observation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only turn sequence plus the execution attempts behind it.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    turns: Vec<ConversationTurn>,
    attempts: Vec<ExecutionAttempt>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ConversationTurn::new(role, content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content);
    }

    pub fn push_model(&mut self, content: impl Into<String>) {
        self.push(Role::Model, content);
    }

    pub fn push_observation(&mut self, content: impl Into<String>) {
        self.push(Role::Observation, content);
    }

    pub fn record_attempt(&mut self, attempt: ExecutionAttempt) {
        self.attempts.push(attempt);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn attempts(&self) -> &[ExecutionAttempt] {
        &self.attempts
    }

    pub fn last_attempt(&self) -> Option<&ExecutionAttempt> {
        self.attempts.last()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Forget turns and attempts. Learned fixes live on the session and survive.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.attempts.clear();
    }
}

/// Error-signature to remedy hints, collected while the session runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearningStore {
    fixes: BTreeMap<String, String>,
}

impl LearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fixes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Store `fix` under the normalised signature of `error`.
    pub fn record(&mut self, error: &str, fix: impl Into<String>) {
        let key = normalize_signature(error);
        if !key.is_empty() {
            self.fixes.insert(key, fix.into());
        }
    }

    /// Find a fix whose key contains, or is contained by, `error`.
    pub fn lookup(&self, error: &str) -> Option<&str> {
        let needle = normalize_signature(error);
        if needle.is_empty() {
            return None;
        }
        self.fixes
            .iter()
            .find(|(key, _)| key.contains(&needle) || needle.contains(key.as_str()))
            .map(|(_, fix)| fix.as_str())
    }

    /// Record the pairing if `failed` and `succeeded` look like two tries at
    /// the same thing. Returns whether something was learned.
    pub fn learn_from(&mut self, failed: &ExecutionAttempt, succeeded: &ExecutionAttempt) -> bool {
        if failed.is_success() || !succeeded.is_success() {
            return false;
        }
        if !commands_related(&failed.command, &succeeded.command) {
            return false;
        }
        let signature = error_signature(failed);
        tracing::debug!(%signature, fix = %succeeded.command, "learned fix");
        self.record(&signature, succeeded.command.clone());
        true
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read learning data: {}", path.display()))?;
        let store = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse learning data: {}", path.display()))?;
        Ok(store)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create learning directory: {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write learning data: {}", path.display()))?;
        Ok(())
    }
}

fn normalize_signature(text: &str) -> String {
    text.trim().to_lowercase().chars().take(SIGNATURE_LENGTH).collect()
}

/// Key under which a failed attempt's fix is remembered.
///
/// First non-empty line of stderr, else stdout, else a description of how
/// the attempt ended.
pub fn error_signature(attempt: &ExecutionAttempt) -> String {
    let first_line = |text: &str| {
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    };
    let line = first_line(&attempt.stderr)
        .or_else(|| first_line(&attempt.stdout))
        .unwrap_or_else(|| match attempt.outcome {
            ExecutionOutcome::TimedOut => format!("{} timed out", program_of(&attempt.command)),
            ExecutionOutcome::SpawnFailed => format!("{} failed to start", program_of(&attempt.command)),
            ExecutionOutcome::Completed => format!(
                "{} exited with {}",
                program_of(&attempt.command),
                attempt.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
            ),
        });
    normalize_signature(&line)
}

fn words(command: &str) -> Vec<String> {
    shell_words::split(command)
        .unwrap_or_else(|_| command.split_whitespace().map(str::to_string).collect())
}

fn program_of(command: &str) -> String {
    words(command)
        .into_iter()
        .find(|w| !w.contains('='))
        .map(|w| w.rsplit('/').next().unwrap_or(&w).to_string())
        .unwrap_or_default()
}

/// Same leading program, or a shared significant argument.
pub fn commands_related(a: &str, b: &str) -> bool {
    let (pa, pb) = (program_of(a), program_of(b));
    if !pa.is_empty() && pa == pb {
        return true;
    }
    let significant = |command: &str| -> Vec<String> {
        words(command)
            .into_iter()
            .skip(1)
            .filter(|w| w.len() >= 3 && !w.starts_with('-'))
            .collect()
    };
    let wb = significant(b);
    significant(a).iter().any(|w| wb.contains(w))
}

/// State for one user conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub conversation: ConversationContext,
    pub iteration_count: u32,
    pub platform: PlatformInfo,
    pub learned_fixes: LearningStore,
    /// Rendered project attachment for the current query
    pub local_context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(platform: PlatformInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation: ConversationContext::new(),
            iteration_count: 0,
            platform,
            learned_fixes: LearningStore::new(),
            local_context: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_learned_fixes(mut self, fixes: LearningStore) -> Self {
        self.learned_fixes = fixes;
        self
    }

    /// Clear the conversation; learned fixes are kept.
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.iteration_count = 0;
        self.local_context = None;
    }
}
