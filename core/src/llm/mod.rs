//! Model transport
//!
//! The execution loop only sees [`ModelClient`]. [`LlmClient`] is the HTTP
//! implementation used by the binary.

pub mod chat;
pub mod client;
pub mod stream;

pub use chat::{ChatMessage, ChatRequest, MessageRole};
pub use client::{LlmClient, LlmConfig, LlmProvider};

use crate::error::ModelError;
use async_trait::async_trait;

/// Sends one prompt context and returns the complete model text.
///
/// Streaming backends must buffer until the reply is complete; a partial
/// reply is a [`ModelError::Protocol`], never a shorter `Ok`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<String, ModelError>;
}
