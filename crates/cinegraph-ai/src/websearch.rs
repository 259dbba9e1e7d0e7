use std::time::Duration;

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::warn;

use cinegraph_core::{CinegraphError, Result, WebSearchConfig};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

/// Thin web-search client for the agent's `search_web` tool.
pub struct WebSearchClient {
    config: WebSearchConfig,
    client: Client,
}

impl WebSearchClient {
    pub fn new(config: WebSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("cinegraph/0.3")
            .build()
            .map_err(|e| CinegraphError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(CinegraphError::Configuration(
                "web search API key is not configured".to_string(),
            ));
        }

        let request = SearchRequest {
            api_key: &api_key,
            query,
            max_results: self.config.max_results,
        };
        let url = format!("{}/search", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CinegraphError::Network(format!("web search failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("web search returned HTTP {}: {}", status, body);
            return Err(CinegraphError::External(format!(
                "web search error (HTTP {})",
                status
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CinegraphError::External(format!("unparseable search response: {}", e)))?;
        Ok(parsed.results)
    }
}

/// The canned query shapes the `search_web` tool exposes.
pub fn web_query_for(entity_name: &str, search_type: &str) -> String {
    match search_type {
        "awards" => format!("배우 {} 수상 이력 영화제", entity_name),
        "news" => format!("배우 {} 최신 뉴스", entity_name),
        _ => format!("배우 {} 최신 근황", entity_name),
    }
}

/// Bullet-format results for the agent transcript.
pub fn format_results(entity_name: &str, search_type: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("[웹 검색] '{}' ({}) - 검색 결과 없음", entity_name, search_type);
    }
    let mut out = format!("[웹 검색 결과] {} ({}):\n", entity_name, search_type);
    for (i, r) in results.iter().enumerate() {
        let content: String = r.content.chars().take(200).collect();
        out.push_str(&format!(
            "\n{}. {}\n   {}...\n   URL: {}\n",
            i + 1,
            r.title,
            content,
            r.url
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_shapes_follow_the_search_type() {
        assert!(web_query_for("전지현", "recent").contains("최신 근황"));
        assert!(web_query_for("전지현", "awards").contains("수상 이력"));
        assert!(web_query_for("전지현", "news").contains("최신 뉴스"));
        // unknown types fall back to recent
        assert!(web_query_for("전지현", "whatever").contains("최신 근황"));
    }

    #[test]
    fn formatting_truncates_long_content() {
        let results = vec![SearchResult {
            title: "기사".to_string(),
            content: "가".repeat(500),
            url: "https://example.com".to_string(),
        }];
        let formatted = format_results("전지현", "recent", &results);
        assert!(formatted.contains("기사"));
        assert!(formatted.chars().count() < 300);
    }

    #[test]
    fn empty_results_format_as_a_miss() {
        let formatted = format_results("전지현", "news", &[]);
        assert!(formatted.contains("검색 결과 없음"));
    }
}
