//! Answer-only mode: the reply is streamed, nothing is executed.

use cla_core::context::PlatformInfo;
use cla_core::llm::ChatMessage;

/// Message history for chat mode, seeded with a platform-aware system prompt.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new(platform: &PlatformInfo) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt(platform))],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Drop the last user message after a failed or cancelled reply.
    pub fn pop_user(&mut self) {
        if self.messages.len() > 1 {
            self.messages.pop();
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Keep only the system prompt.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }
}

fn system_prompt(platform: &PlatformInfo) -> String {
    let mut prompt = String::from(
        "You are a Linux command-line assistant. Answer concisely. When a \
         shell command helps, show it in a fenced code block and explain what \
         it does. Commands are not run for the user in this mode.",
    );
    match platform.family.package_manager() {
        Some(pm) => prompt.push_str(&format!(
            "\n\nThe user runs {} ({} family); the package manager is {}.",
            platform.distribution, platform.family, pm
        )),
        None => prompt.push_str("\n\nThe user's distribution is unknown."),
    }
    prompt
}
