use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, warn};

use cinegraph_ai::{
    parse_search_context, prompts, EmbeddingProvider, GenerationConfig, LlmProvider, Message,
};
use cinegraph_core::{
    ChunkHit, CinegraphError, EntityLabel, GraphStore, MentionedEntity, NeighborRow, QueryConfig,
    Result, SearchIndex,
};
use cinegraph_index::CanonicalRegistry;

use crate::agentic::{run_entity_agent, AgenticOutcome};
use crate::fusion::build_context;
use crate::graph_search::{entity_names_from_rows, SmartGraphSearch, SmartSearchResult};
use crate::tools::AgentTools;

/// Labels tried, in order, when resolving a query-side surface name whose
/// type is unknown.
const RESOLUTION_LABELS: [EntityLabel; 5] = [
    EntityLabel::Actor,
    EntityLabel::Movie,
    EntityLabel::MovieCharacter,
    EntityLabel::MovieStaff,
    EntityLabel::Reviewer,
];

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub query: String,
    pub extracted_entities: Vec<String>,
    pub resolved_mapping: BTreeMap<String, String>,
    #[serde(skip)]
    pub chunks: Vec<ChunkHit>,
    pub graph_summary: Option<String>,
    pub agentic_results: Vec<AgenticOutcome>,
    pub answer: String,
}

/// The query router: extract entities from the question, resolve them,
/// fan out to chunk KNN + graph expansion and the structured graph branch,
/// gate prompt-carrying entities to agents, fuse, answer. A per-query
/// deadline cancels stragglers; their contributions are omitted.
pub struct QueryRouter {
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn SearchIndex>,
    registry: Arc<CanonicalRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<AgentTools>,
    config: QueryConfig,
}

impl QueryRouter {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        index: Arc<dyn SearchIndex>,
        registry: Arc<CanonicalRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<AgentTools>,
        config: QueryConfig,
    ) -> Self {
        Self {
            graph,
            index,
            registry,
            embedder,
            llm,
            tools,
            config,
        }
    }

    pub async fn run_query(&self, question: &str) -> Result<QueryAnswer> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.deadline_secs);
        info!("query: {}", question);

        // 1. entity extraction from the question
        let extracted = self.extract_entities(question).await;
        info!("extracted entities: {:?}", extracted);

        // 2. resolution via the registry
        let mut resolved_mapping = BTreeMap::new();
        for surface in &extracted {
            let resolved = self.resolve_any(surface).await;
            resolved_mapping.insert(surface.clone(), resolved);
        }

        // the structured branch queries with canonical names
        let mut rewritten = question.to_string();
        for (surface, resolved) in &resolved_mapping {
            if surface != resolved {
                rewritten = rewritten.replace(surface.as_str(), resolved);
            }
        }

        // 3. retrieval fan-out, bounded by the whole-query deadline
        let remaining = deadline.saturating_sub(started.elapsed());
        let smart = SmartGraphSearch::new(Arc::clone(&self.graph), Arc::clone(&self.llm));
        let (chunk_branch, graph_branch) = tokio::join!(
            timeout(remaining, self.retrieve_chunks(question)),
            timeout(remaining, smart.smart_search(&rewritten)),
        );

        let (chunks, entities, relationships) = match chunk_branch {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                warn!("chunk branch failed: {}", e);
                (Vec::new(), Vec::new(), Vec::new())
            }
            Err(_) => {
                warn!("chunk branch hit the deadline");
                (Vec::new(), Vec::new(), Vec::new())
            }
        };
        let graph_result = match graph_branch {
            Ok(result) => result,
            Err(_) => {
                warn!("graph branch hit the deadline");
                SmartSearchResult::default()
            }
        };

        // 4. agentic gating over every discovered entity
        let mut candidate_names: BTreeSet<String> = resolved_mapping.values().cloned().collect();
        candidate_names.extend(entities.iter().map(|e| e.name.clone()));
        candidate_names.extend(entity_names_from_rows(&graph_result.rows));

        let remaining = deadline.saturating_sub(started.elapsed());
        let agentic_results = self
            .run_agents(&candidate_names, question, remaining)
            .await;

        // 5. fusion and the final answer
        let graph_summary = graph_result
            .success
            .then(|| graph_result.summary.clone())
            .filter(|s| !s.is_empty());
        let context = build_context(
            question,
            &chunks,
            &entities,
            &relationships,
            graph_summary.as_deref(),
            &agentic_results,
        );

        let messages = vec![
            Message::system(prompts::answer_system_prompt()),
            Message::user(format!("{}\n\n질문: {}\n\n답변:", context, question)),
        ];
        let response = self
            .llm
            .generate_chat(&messages, &GenerationConfig::default())
            .await
            .map_err(|e| {
                CinegraphError::Llm(format!("failed to produce a grounded answer: {}", e))
            })?;

        Ok(QueryAnswer {
            query: question.to_string(),
            extracted_entities: extracted,
            resolved_mapping,
            chunks,
            graph_summary,
            agentic_results,
            answer: response.content,
        })
    }

    async fn extract_entities(&self, question: &str) -> Vec<String> {
        let prompt = prompts::query_entity_prompt(question);
        match self.llm.generate(&prompt).await {
            Ok(response) => parse_search_context(&response.content),
            Err(e) => {
                warn!("query entity extraction failed: {}", e);
                Vec::new()
            }
        }
    }

    /// The question carries no type information, so try the known labels
    /// in order and take the first match.
    async fn resolve_any(&self, surface: &str) -> String {
        for label in &RESOLUTION_LABELS {
            let outcome = self.registry.resolve(surface, label).await;
            if outcome.matched {
                return outcome.resolved_name;
            }
        }
        surface.to_string()
    }

    /// Chunk KNN plus graph expansion: embed the question, pull the top-k
    /// chunks, collect their mentioned entities, and expand the top ten
    /// entities by the configured number of hops.
    async fn retrieve_chunks(
        &self,
        question: &str,
    ) -> Result<(Vec<ChunkHit>, Vec<MentionedEntity>, Vec<NeighborRow>)> {
        let vector = self.embedder.embed_text(question).await?;
        let chunks = self.index.knn_chunks(&vector, self.config.top_k).await?;
        info!("{} chunk hits", chunks.len());

        let mut entities: Vec<MentionedEntity> = Vec::new();
        let mut seen = BTreeSet::new();
        for hit in &chunks {
            match self.graph.chunk_mentions(&hit.canonical_id).await {
                Ok(mentions) => {
                    for mention in mentions {
                        if seen.insert(mention.name.clone()) {
                            entities.push(mention);
                        }
                    }
                }
                Err(e) => warn!("mentions lookup failed for {}: {}", hit.canonical_id, e),
            }
        }

        let mut relationships = Vec::new();
        for entity in entities.iter().take(10) {
            match self
                .graph
                .entity_neighborhood(&entity.name, self.config.neighbor_hops)
                .await
            {
                Ok(rows) => relationships.extend(rows),
                Err(e) => warn!("neighborhood lookup failed for {}: {}", entity.name, e),
            }
        }

        Ok((chunks, entities, relationships))
    }

    /// Dispatch an agent for every entity whose node carries a `prompt`
    /// property, bounded by the agent pool and the remaining deadline.
    async fn run_agents(
        &self,
        names: &BTreeSet<String>,
        question: &str,
        remaining: Duration,
    ) -> Vec<AgenticOutcome> {
        let names: Vec<String> = names.iter().cloned().collect();
        let prompt_infos = match self.graph.entity_prompts(&names).await {
            Ok(infos) => infos,
            Err(e) => {
                warn!("prompt lookup failed: {}", e);
                return Vec::new();
            }
        };

        let agentic: Vec<(String, String)> = prompt_infos
            .into_iter()
            .filter_map(|(name, info)| info.prompt.map(|p| (name, p)))
            .collect();
        if agentic.is_empty() {
            return Vec::new();
        }
        info!("{} agentic entities", agentic.len());

        let semaphore = Arc::new(Semaphore::new(self.config.agent_pool.max(1)));
        let mut handles = Vec::with_capacity(agentic.len());
        for (name, entity_prompt) in agentic {
            let llm = Arc::clone(&self.llm);
            let tools = Arc::clone(&self.tools);
            let semaphore = Arc::clone(&semaphore);
            let question = question.to_string();
            let max_rounds = self.config.max_agent_rounds;

            handles.push(tokio::spawn(timeout(remaining, async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                run_entity_agent(llm, tools, &name, &entity_prompt, &question, max_rounds).await
            })));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(_)) => warn!("agent task hit the deadline; omitting its contribution"),
                Err(e) => warn!("agent task panicked: {}", e),
            }
        }
        outcomes
    }
}
