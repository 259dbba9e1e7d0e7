//! Router scenarios against the in-memory backends: the agentic branch
//! fires exactly when an entity node carries a `prompt` property, and the
//! answer stays grounded when branches degrade.

use std::sync::Arc;

use cinegraph_ai::{
    EmbeddingProvider, HashEmbedding, LlmResponse, ScriptedLlm, ToolCall,
};
use cinegraph_core::{
    ChunkDoc, EntityDoc, EntityLabel, GraphStore, QueryConfig, SearchIndex, Strength,
};
use cinegraph_graph::MemoryGraph;
use cinegraph_index::{CanonicalRegistry, MemoryIndex};
use cinegraph_query::{AgentTools, QueryRouter};
use serde_json::json;

async fn seeded_world() -> (Arc<MemoryGraph>, Arc<MemoryIndex>) {
    let graph = Arc::new(MemoryGraph::new());
    for (name, label, desc) in [
        ("전지현", EntityLabel::Actor, "암살 주연 배우"),
        ("안옥윤", EntityLabel::MovieCharacter, "저격수 독립군"),
        ("암살", EntityLabel::Movie, "1930년대 배경 영화"),
    ] {
        graph
            .upsert_entity_with_accumulated_description(&label, name, &[desc.to_string()])
            .await
            .unwrap();
    }
    graph
        .upsert_relationship_single(
            "전지현",
            &EntityLabel::Actor,
            "안옥윤",
            &EntityLabel::MovieCharacter,
            &["안옥윤 역을 연기".to_string()],
            &Strength::Int(9),
        )
        .await
        .unwrap();
    graph
        .upsert_base_provenance("암살", "rev", "rev_chunk_1", "전지현은 암살에서 안옥윤을 연기했다")
        .await
        .unwrap();
    graph
        .upsert_mentions_edge("rev_chunk_1", "전지현", &EntityLabel::Actor)
        .await
        .unwrap();
    graph
        .upsert_mentions_edge("rev_chunk_1", "안옥윤", &EntityLabel::MovieCharacter)
        .await
        .unwrap();

    let index = Arc::new(MemoryIndex::new());
    index
        .put_entity(
            "Jun_Ji_hyun_ACTOR_0001",
            &EntityDoc {
                name: "전지현".to_string(),
                synonym: vec!["전지현".to_string(), "지안나 전".to_string()],
                entity_type: EntityLabel::Actor,
                summary: "한국 배우".to_string(),
                summary_vec: Vec::new(),
                canonical_id: Some("Jun_Ji_hyun_ACTOR_0001".to_string()),
            },
        )
        .await
        .unwrap();

    let embedder = HashEmbedding::new();
    let chunk_text = "전지현은 암살에서 안옥윤을 연기했다";
    index
        .put_chunk(
            "rev_chunk_1",
            &ChunkDoc {
                context: chunk_text.to_string(),
                context_vec: embedder.embed_text(chunk_text).await.unwrap(),
                canonical_id: "rev_chunk_1".to_string(),
            },
        )
        .await
        .unwrap();

    (graph, index)
}

fn router(
    graph: Arc<MemoryGraph>,
    index: Arc<MemoryIndex>,
    llm: Arc<ScriptedLlm>,
) -> QueryRouter {
    let registry = Arc::new(CanonicalRegistry::new(index.clone(), false));
    let tools = Arc::new(AgentTools::new(graph.clone(), None));
    QueryRouter::new(
        graph,
        index,
        registry,
        Arc::new(HashEmbedding::new()),
        llm,
        tools,
        QueryConfig::default(),
    )
}

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
async fn agentic_branch_fires_when_the_node_carries_a_prompt() {
    let (graph, index) = seeded_world().await;
    graph.set_prompt(
        &EntityLabel::Actor,
        "전지현",
        "{name}의 최신 근황을 조사해서 답하세요.",
    );

    let llm = Arc::new(ScriptedLlm::new());
    // 1. query entity extraction
    llm.push_text("##(\"entity\"|전지현)##<END>");
    // 2. cypher generation (structured branch)
    llm.push_text("```json\n{\"cypher_query\": \"MATCH (a:ACTOR) RETURN a.name LIMIT 20\"}\n```");
    // 3. agent: one graph tool call, then a final answer
    llm.push_response(tool_call_response(
        "search_neptune",
        json!({"entity_name": "전지현", "query_type": "relationships"}),
    ));
    llm.push_text("전지현은 최근 신작 드라마에 출연했습니다.");
    // 4. final fused answer
    llm.push_text("전지현은 암살에서 안옥윤 역을 맡았고, 최근 신작 드라마에 출연했습니다.");

    let router = router(graph, index, llm);
    let result = router
        .run_query("전지현의 최신 근황과 암살에서 역할은?")
        .await
        .unwrap();

    assert_eq!(result.extracted_entities, vec!["전지현"]);
    assert_eq!(result.resolved_mapping["전지현"], "전지현");
    assert!(!result.chunks.is_empty());
    assert_eq!(result.agentic_results.len(), 1);
    assert!(result.agentic_results[0].success);
    assert!(result.agentic_results[0].result.contains("신작"));
    assert!(result.answer.contains("안옥윤"));
}

#[tokio::test]
async fn agent_branch_is_skipped_without_a_prompt() {
    let (graph, index) = seeded_world().await;

    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("##(\"entity\"|전지현)##<END>");
    // structured branch degrades on the memory backend; scripted cypher
    llm.push_text("```json\n{\"cypher_query\": \"MATCH (a:ACTOR) RETURN a.name LIMIT 20\"}\n```");
    // final answer comes straight after, no agent calls in between
    llm.push_text("전지현은 암살에서 안옥윤 역을 맡았습니다.");

    let router = router(graph, index, llm);
    let result = router.run_query("암살에서 전지현의 역할은?").await.unwrap();

    assert!(result.agentic_results.is_empty());
    assert!(result.answer.contains("안옥윤"));
    // the chunk branch still grounded the answer
    assert!(!result.chunks.is_empty());
}

#[tokio::test]
async fn synonyms_resolve_before_retrieval() {
    let (graph, index) = seeded_world().await;

    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("##(\"entity\"|지안나 전)##<END>");
    llm.push_text("no cypher");
    llm.push_text("답변");

    let router = router(graph, index, llm);
    let result = router.run_query("지안나 전의 역할은?").await.unwrap();
    assert_eq!(result.resolved_mapping["지안나 전"], "전지현");
}

#[tokio::test]
async fn empty_extraction_still_produces_an_answer() {
    let (graph, index) = seeded_world().await;

    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("<END>");
    llm.push_text("no cypher");
    llm.push_text("컨텍스트 기반 답변");

    let router = router(graph, index, llm);
    let result = router.run_query("이 영화 어때?").await.unwrap();
    assert!(result.extracted_entities.is_empty());
    assert_eq!(result.answer, "컨텍스트 기반 답변");
}
