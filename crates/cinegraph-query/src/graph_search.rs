use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use cinegraph_ai::{parse_cypher_output, prompts, LlmProvider};
use cinegraph_core::GraphStore;

/// Outcome of the structured graph branch. `success == false` carries the
/// reason; the router degrades rather than failing the query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SmartSearchResult {
    pub success: bool,
    pub cypher_query: String,
    pub results_count: usize,
    pub summary: String,
    #[serde(skip)]
    pub rows: Vec<Map<String, Value>>,
    pub error: Option<String>,
}

impl SmartSearchResult {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Generate a Cypher query from the question, execute it, and summarize
/// the rows: the "smart search" branch of the router.
pub struct SmartGraphSearch {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
}

impl SmartGraphSearch {
    pub fn new(graph: Arc<dyn GraphStore>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { graph, llm }
    }

    pub async fn smart_search(&self, question: &str) -> SmartSearchResult {
        let cypher = match self.generate_cypher(question).await {
            Some(cypher) => cypher,
            None => return SmartSearchResult::failed("could not generate a Cypher query"),
        };

        if !is_read_only(&cypher) {
            warn!("rejecting non-read-only generated query: {}", cypher);
            return SmartSearchResult::failed("generated query was not read-only");
        }

        debug!("smart search query: {}", cypher);
        let rows = match self.graph.raw_query(&cypher).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("smart search execution failed: {}", e);
                let mut result = SmartSearchResult::failed(e.to_string());
                result.cypher_query = cypher;
                return result;
            }
        };

        let summary = self.summarize(question, &cypher, &rows).await;
        SmartSearchResult {
            success: true,
            results_count: rows.len(),
            cypher_query: cypher,
            summary,
            rows,
            error: None,
        }
    }

    async fn generate_cypher(&self, question: &str) -> Option<String> {
        let prompt = prompts::cypher_prompt(question);
        match self.llm.generate(&prompt).await {
            Ok(response) => parse_cypher_output(&response.content),
            Err(e) => {
                warn!("cypher generation failed: {}", e);
                None
            }
        }
    }

    async fn summarize(&self, question: &str, cypher: &str, rows: &[Map<String, Value>]) -> String {
        let limited: Vec<_> = rows.iter().take(10).collect();
        let results_json =
            serde_json::to_string_pretty(&limited).unwrap_or_else(|_| "[]".to_string());
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let prompt =
            prompts::cypher_summary_prompt(&now, question, cypher, &results_json, rows.len());
        match self.llm.generate(&prompt).await {
            Ok(response) => response.content.trim().to_string(),
            Err(e) => format!("요약 생성 중 오류 발생: {}", e),
        }
    }
}

/// Entity names appearing as string values in the result rows; used for
/// agentic gating.
pub fn entity_names_from_rows(rows: &[Map<String, Value>]) -> Vec<String> {
    let mut names = std::collections::BTreeSet::new();
    for row in rows {
        for value in row.values() {
            if let Some(s) = value.as_str() {
                if s.chars().count() > 1 {
                    names.insert(s.to_string());
                }
            }
        }
    }
    names.into_iter().collect()
}

fn is_read_only(cypher: &str) -> bool {
    let upper = cypher.to_uppercase();
    upper.trim_start().starts_with("MATCH")
        && !["CREATE", "MERGE", "DELETE", "SET ", "REMOVE", "DROP"]
            .iter()
            .any(|kw| upper.contains(kw))
}
