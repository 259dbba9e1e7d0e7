use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use cinegraph_core::Result;

use crate::llm_provider::{GenerationConfig, LlmProvider, LlmResponse, Message, ToolDefinition};

/// Offline provider that replays queued responses in order, falling back to
/// a fixed completion when the queue runs dry. Used by stage tests and dry
/// runs; never talks to the network.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    fallback: String,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: "<END>".to_string(),
        }
    }

    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
        }
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.responses.lock().push_back(LlmResponse {
            content: content.into(),
            model: "scripted".to_string(),
            finish_reason: Some("end_turn".to_string()),
            prompt_tokens: None,
            completion_tokens: None,
            tool_calls: None,
        });
    }

    pub fn push_response(&self, response: LlmResponse) {
        self.responses.lock().push_back(response);
    }

    fn next(&self) -> LlmResponse {
        self.responses.lock().pop_front().unwrap_or(LlmResponse {
            content: self.fallback.clone(),
            model: "scripted".to_string(),
            finish_reason: Some("end_turn".to_string()),
            prompt_tokens: None,
            completion_tokens: None,
            tool_calls: None,
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> Result<LlmResponse> {
        Ok(self.next())
    }

    async fn generate_chat_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _config: &GenerationConfig,
    ) -> Result<LlmResponse> {
        Ok(self.next())
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
