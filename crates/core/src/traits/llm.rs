//! Language model collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::Result;

/// LLM client interface.
///
/// Implementations must be safe to share between in-flight requests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a chat completion.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse>;

    /// Generate text from a system instruction block and a user message.
    async fn generate(&self, system_instructions: &str, user_text: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(system_instructions),
            ChatMessage::user(user_text),
        ];
        Ok(self.chat(&messages).await?.content)
    }
}

/// Chat message for LLM interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (system, user, assistant).
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Generated content.
    pub content: String,
    /// Finish reason.
    pub finish_reason: String,
    /// Token usage.
    pub usage: LlmUsage,
}

/// Token usage from LLM call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
}
