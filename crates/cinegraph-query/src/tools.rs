use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use cinegraph_ai::{format_results, web_query_for, ToolCall, ToolDefinition, WebSearchClient};
use cinegraph_core::{EntityLabel, GraphStore};

/// The two tools an agentic entity gets: graph lookups over what the
/// pipeline ingested, and live web search.
pub struct AgentTools {
    graph: Arc<dyn GraphStore>,
    web: Option<Arc<WebSearchClient>>,
}

impl AgentTools {
    pub fn new(graph: Arc<dyn GraphStore>, web: Option<Arc<WebSearchClient>>) -> Self {
        Self { graph, web }
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "search_neptune".to_string(),
                description: "그래프 DB에서 엔티티의 출연작, 배역, 관계 정보를 조회합니다."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "entity_name": { "type": "string", "description": "조회할 엔티티 이름" },
                        "query_type": {
                            "type": "string",
                            "enum": ["filmography", "characters", "relationships"],
                            "description": "조회 유형"
                        }
                    },
                    "required": ["entity_name"]
                }),
            },
            ToolDefinition {
                name: "search_web".to_string(),
                description: "웹에서 엔티티의 최신 근황, 수상 이력, 뉴스를 검색합니다.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "entity_name": { "type": "string", "description": "검색할 엔티티 이름" },
                        "search_type": {
                            "type": "string",
                            "enum": ["recent", "awards", "news"],
                            "description": "검색 유형"
                        }
                    },
                    "required": ["entity_name"]
                }),
            },
        ]
    }

    /// Execute one tool call. Tool failures become text the agent can read;
    /// they never abort the agent.
    pub async fn execute(&self, call: &ToolCall) -> String {
        let entity_name = call.input["entity_name"].as_str().unwrap_or_default();
        match call.name.as_str() {
            "search_neptune" => {
                let query_type = call.input["query_type"].as_str().unwrap_or("relationships");
                self.search_graph(entity_name, query_type).await
            }
            "search_web" => {
                let search_type = call.input["search_type"].as_str().unwrap_or("recent");
                self.search_web(entity_name, search_type).await
            }
            other => format!("알 수 없는 도구: {}", other),
        }
    }

    async fn search_graph(&self, entity_name: &str, query_type: &str) -> String {
        let rows = match self.graph.entity_neighborhood(entity_name, 1).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("graph tool failed for '{}': {}", entity_name, e);
                return format!("'{}' 그래프 조회 중 오류가 발생했습니다.", entity_name);
            }
        };

        let filter_label = match query_type {
            "filmography" => Some(EntityLabel::Movie),
            "characters" => Some(EntityLabel::MovieCharacter),
            _ => None,
        };
        let rows: Vec<_> = rows
            .into_iter()
            .filter(|row| filter_label.as_ref().map_or(true, |l| row.target_label == *l))
            .take(15)
            .collect();

        if rows.is_empty() {
            return format!("'{}'의 {} 정보를 찾을 수 없습니다.", entity_name, query_type);
        }

        let mut out = format!("[그래프 DB] {} - {}:\n", entity_name, query_type);
        for row in rows {
            let description = row
                .rel_description
                .first()
                .map(|d| d.chars().take(100).collect::<String>())
                .unwrap_or_default();
            out.push_str(&format!(
                "  - [{}] → {} ({}): {}\n",
                row.relationship, row.target, row.target_label, description
            ));
        }
        out
    }

    async fn search_web(&self, entity_name: &str, search_type: &str) -> String {
        let Some(web) = &self.web else {
            return "웹 검색 도구가 설정되지 않았습니다.".to_string();
        };
        let query = web_query_for(entity_name, search_type);
        match web.search(&query).await {
            Ok(results) => format_results(entity_name, search_type, &results),
            Err(e) => format!("[웹 검색 실패] {}: {}", query, e),
        }
    }
}
