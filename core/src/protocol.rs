//! Response contract shared by the model transport and the output parser.
//!
//! The model is asked to answer with a JSON object of the shape
//! `{"thinking": string, "command": string|null, "task_complete": boolean}`.

use serde::{Deserialize, Deserializer, Serialize};

/// One structured unit proposed by the model for a loop iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    /// Reasoning or explanation shown to the user
    pub thinking: String,
    /// Candidate shell command; `None` means nothing to execute this round
    pub command: Option<String>,
    /// Whether the model considers the task finished
    pub task_complete: bool,
    /// The unparsed model text this value was built from
    #[serde(skip)]
    pub raw: String,
}

impl ActionResponse {
    /// Response used for an empty model reply: a graceful stop.
    pub fn empty(raw: impl Into<String>) -> Self {
        Self {
            thinking: String::new(),
            command: None,
            task_complete: true,
            raw: raw.into(),
        }
    }

    pub fn has_command(&self) -> bool {
        self.command
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Wire form of [`ActionResponse`].
///
/// All three keys must be present; `command` may be `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseContract {
    pub thinking: String,
    #[serde(deserialize_with = "required_nullable")]
    pub command: Option<String>,
    pub task_complete: bool,
}

impl ResponseContract {
    pub fn into_action(self, raw: impl Into<String>) -> ActionResponse {
        ActionResponse {
            thinking: self.thinking,
            command: self.command,
            task_complete: self.task_complete,
            raw: raw.into(),
        }
    }
}

// A custom deserializer disables serde's implicit `None` for missing Option
// fields, so an absent `command` key is a parse error rather than `null`.
fn required_nullable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

/// JSON schema declared to schema-capable backends.
pub fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "thinking": {
                "type": "string",
                "description": "The reasoning or explanation for the action taken"
            },
            "command": {
                "type": ["string", "null"],
                "description": "A single Linux shell command to execute, or null if no command is needed"
            },
            "task_complete": {
                "type": "boolean",
                "description": "Whether the task is complete and no further actions are needed"
            }
        },
        "required": ["thinking", "command", "task_complete"],
        "additionalProperties": false
    })
}
