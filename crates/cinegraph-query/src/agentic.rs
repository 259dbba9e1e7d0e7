use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use cinegraph_ai::{prompts, GenerationConfig, LlmProvider, Message};
use cinegraph_core::Result;

use crate::tools::AgentTools;

/// Result of one agentic entity, grouped into the fused context.
#[derive(Debug, Clone, Serialize)]
pub struct AgenticOutcome {
    pub entity: String,
    pub result: String,
    pub success: bool,
}

/// Run one entity's agent: its `prompt` property (with `{name}` filled)
/// seeds the system prompt, and the model loops over the graph/web tools
/// for a bounded number of rounds. Failures degrade to an unsuccessful
/// outcome; the caller drops those from fusion.
pub async fn run_entity_agent(
    llm: Arc<dyn LlmProvider>,
    tools: Arc<AgentTools>,
    entity_name: &str,
    entity_prompt: &str,
    user_query: &str,
    max_rounds: usize,
) -> AgenticOutcome {
    match agent_loop(llm, tools, entity_name, entity_prompt, user_query, max_rounds).await {
        Ok(result) => AgenticOutcome {
            entity: entity_name.to_string(),
            result,
            success: true,
        },
        Err(e) => {
            warn!("agent for '{}' failed: {}", entity_name, e);
            AgenticOutcome {
                entity: entity_name.to_string(),
                result: format!("오류: {}", e),
                success: false,
            }
        }
    }
}

async fn agent_loop(
    llm: Arc<dyn LlmProvider>,
    tools: Arc<AgentTools>,
    entity_name: &str,
    entity_prompt: &str,
    user_query: &str,
    max_rounds: usize,
) -> Result<String> {
    let definitions = AgentTools::definitions();
    let config = GenerationConfig::default();

    let mut messages = vec![
        Message::system(prompts::agent_system_prompt(entity_prompt, entity_name)),
        Message::user(prompts::agent_user_prompt(entity_name, user_query)),
    ];

    let mut last_content = String::new();
    for round in 0..max_rounds.max(1) {
        let response = llm
            .generate_chat_with_tools(&messages, &definitions, &config)
            .await?;
        last_content = response.content.clone();

        let Some(calls) = response.tool_calls.filter(|c| !c.is_empty()) else {
            return Ok(response.content);
        };

        debug!(
            "agent '{}' round {}: {} tool calls",
            entity_name,
            round + 1,
            calls.len()
        );
        messages.push(Message::assistant_with_tool_calls(
            response.content,
            calls.clone(),
        ));
        for call in &calls {
            let output = tools.execute(call).await;
            messages.push(Message::tool_result(call.id.clone(), output));
        }
    }

    // rounds exhausted mid-tool-use; return whatever text we have
    Ok(last_content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_ai::{LlmResponse, ScriptedLlm, ToolCall};
    use cinegraph_graph::MemoryGraph;
    use serde_json::json;

    fn tool_call_response(name: &str, input: serde_json::Value) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            model: "scripted".to_string(),
            finish_reason: Some("tool_use".to_string()),
            prompt_tokens: None,
            completion_tokens: None,
            tool_calls: Some(vec![ToolCall {
                id: "tc_1".to_string(),
                name: name.to_string(),
                input,
            }]),
        }
    }

    #[tokio::test]
    async fn agent_runs_tools_then_answers() {
        let llm = ScriptedLlm::new();
        llm.push_response(tool_call_response(
            "search_neptune",
            json!({"entity_name": "전지현", "query_type": "relationships"}),
        ));
        llm.push_text("전지현은 암살에서 안옥윤 역을 맡았습니다.");

        let tools = Arc::new(AgentTools::new(Arc::new(MemoryGraph::new()), None));
        let outcome = run_entity_agent(
            Arc::new(llm),
            tools,
            "전지현",
            "{name}의 최신 근황을 조사하세요.",
            "전지현의 최신 근황은?",
            4,
        )
        .await;

        assert!(outcome.success);
        assert!(outcome.result.contains("안옥윤"));
    }

    #[tokio::test]
    async fn round_cap_stops_a_tool_looping_agent() {
        let llm = ScriptedLlm::new();
        for _ in 0..10 {
            llm.push_response(tool_call_response(
                "search_neptune",
                json!({"entity_name": "전지현"}),
            ));
        }

        let tools = Arc::new(AgentTools::new(Arc::new(MemoryGraph::new()), None));
        let outcome = run_entity_agent(
            Arc::new(llm),
            tools,
            "전지현",
            "{name} 조사",
            "질문",
            2,
        )
        .await;
        // the loop ends after two rounds without an error
        assert!(outcome.success);
    }
}
