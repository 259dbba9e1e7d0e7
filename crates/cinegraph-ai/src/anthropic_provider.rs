use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use cinegraph_core::{CinegraphError, LlmConfig, Result};

use crate::llm_provider::{
    GenerationConfig, LlmProvider, LlmResponse, Message, MessageRole, ToolCall, ToolDefinition,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider with native tool use.
pub struct AnthropicProvider {
    config: LlmConfig,
    api_key: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(CinegraphError::Configuration(
                "Anthropic API key is required. Set ANTHROPIC_API_KEY or llm.api_key.".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CinegraphError::Network(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Fold our flat message list into the wire shape: system text becomes
    /// the `system` parameter, assistant tool calls become `tool_use`
    /// content blocks, and consecutive tool results collapse into a single
    /// user turn of `tool_result` blocks.
    fn build_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let system = {
            let parts: Vec<&str> = messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(|m| m.content.as_str())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n\n"))
            }
        };

        let mut wire: Vec<Value> = Vec::new();
        let mut pending_results: Vec<Value> = Vec::new();

        let flush_results = |wire: &mut Vec<Value>, pending: &mut Vec<Value>| {
            if !pending.is_empty() {
                wire.push(json!({ "role": "user", "content": std::mem::take(pending) }));
            }
        };

        for message in messages {
            match message.role {
                MessageRole::System => {}
                MessageRole::User => {
                    flush_results(&mut wire, &mut pending_results);
                    wire.push(json!({ "role": "user", "content": message.content }));
                }
                MessageRole::Assistant => {
                    flush_results(&mut wire, &mut pending_results);
                    let mut blocks: Vec<Value> = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": message.content }));
                    }
                    for call in message.tool_calls.iter().flatten() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.input,
                        }));
                    }
                    if blocks.is_empty() {
                        blocks.push(json!({ "type": "text", "text": "" }));
                    }
                    wire.push(json!({ "role": "assistant", "content": blocks }));
                }
                MessageRole::Tool => {
                    pending_results.push(json!({
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                        "content": message.content,
                    }));
                }
            }
        }
        flush_results(&mut wire, &mut pending_results);

        (system, wire)
    }

    async fn send_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &GenerationConfig,
    ) -> Result<AnthropicResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self.try_request(messages, tools, config).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        warn!(
                            "Anthropic request failed (attempt {}/{}), retrying...",
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CinegraphError::Llm("all retry attempts failed".to_string())))
    }

    async fn try_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &GenerationConfig,
    ) -> Result<AnthropicResponse> {
        let (system, wire_messages) = Self::build_messages(messages);

        let mut request = json!({
            "model": self.config.model,
            "messages": wire_messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });
        if let Some(system) = system {
            request["system"] = json!(system);
        }
        if let Some(stop) = &config.stop {
            request["stop_sequences"] = json!(stop);
        }
        if !tools.is_empty() {
            request["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                }))
                .collect::<Vec<_>>());
        }

        let response = self
            .client
            .post(format!("{}/messages", ANTHROPIC_API_BASE))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CinegraphError::Network(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CinegraphError::Llm(format!(
                "Anthropic API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| CinegraphError::Llm(format!("unparseable Anthropic response: {}", e)))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> Result<LlmResponse> {
        self.generate_chat_with_tools(messages, &[], config).await
    }

    async fn generate_chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &GenerationConfig,
    ) -> Result<LlmResponse> {
        let response = self.send_request(messages, tools, config).await?;

        let content = response
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        let tool_calls: Vec<ToolCall> = response
            .content
            .iter()
            .filter(|block| block.content_type == "tool_use")
            .map(|block| ToolCall {
                id: block.id.clone().unwrap_or_default(),
                name: block.name.clone().unwrap_or_default(),
                input: block.input.clone().unwrap_or(Value::Null),
            })
            .collect();

        Ok(LlmResponse {
            content,
            model: response.model,
            finish_reason: Some(response.stop_reason),
            prompt_tokens: Some(response.usage.input_tokens),
            completion_tokens: Some(response.usage.output_tokens),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        })
    }

    async fn is_available(&self) -> bool {
        let messages = vec![Message::user("test")];
        let config = GenerationConfig {
            max_tokens: 1,
            ..GenerationConfig::default()
        };
        self.generate_chat(&messages, &config).await.is_ok()
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Anthropic API response types

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct AnthropicResponse {
    id: String,
    #[serde(rename = "type")]
    response_type: String,
    role: String,
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: String,
    usage: Usage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_creation_requires_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(AnthropicProvider::new(config).is_err());
    }

    #[test]
    fn system_messages_become_the_system_parameter() {
        let messages = vec![
            Message::system("you are a film expert"),
            Message::user("who played Eames?"),
        ];
        let (system, wire) = AnthropicProvider::build_messages(&messages);
        assert_eq!(system.as_deref(), Some("you are a film expert"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn tool_results_collapse_into_one_user_turn() {
        let call = ToolCall {
            id: "tc_1".to_string(),
            name: "search_neptune".to_string(),
            input: json!({"entity_name": "전지현"}),
        };
        let messages = vec![
            Message::user("question"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result("tc_1", "graph rows"),
            Message::tool_result("tc_1b", "more rows"),
        ];
        let (_, wire) = AnthropicProvider::build_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["content"][0]["type"], "tool_use");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(wire[2]["content"][0]["type"], "tool_result");
    }
}
