pub mod anthropic_provider;
pub mod embedding;
pub mod llm_provider;
pub mod parse;
pub mod prompts;
pub mod scripted;
pub mod websearch;

pub use anthropic_provider::AnthropicProvider;
pub use embedding::{EmbeddingProvider, HashEmbedding, HttpEmbeddingProvider};
pub use llm_provider::{
    GenerationConfig, LlmProvider, LlmResponse, Message, MessageRole, ToolCall, ToolDefinition,
};
pub use parse::{
    parse_cypher_output, parse_extraction_output, parse_search_context, parse_summary_output,
    render_extraction_records, SummaryOutput,
};
pub use scripted::ScriptedLlm;
pub use websearch::{format_results, web_query_for, SearchResult, WebSearchClient};
