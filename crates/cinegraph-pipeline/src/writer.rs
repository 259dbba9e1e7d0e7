use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use cinegraph_core::{
    ChunkArtifact, EntityLabel, GraphStore, PipelineConfig, Result, Strength,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterStats {
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub entities_saved: usize,
    pub entities_existing: usize,
    pub entities_new: usize,
    pub entities_skipped: usize,
    pub relationships_saved: usize,
    pub relationships_existing: usize,
    pub relationships_new: usize,
    pub relationships_skipped: usize,
    pub failed_chunk_ids: Vec<String>,
}

impl WriterStats {
    fn apply(&mut self, delta: &StatsDelta) {
        self.entities_saved += delta.entities_saved;
        self.entities_existing += delta.entities_existing;
        self.entities_new += delta.entities_new;
        self.entities_skipped += delta.entities_skipped;
        self.relationships_saved += delta.relationships_saved;
        self.relationships_existing += delta.relationships_existing;
        self.relationships_new += delta.relationships_new;
        self.relationships_skipped += delta.relationships_skipped;
    }
}

#[derive(Debug, Clone, Default)]
struct StatsDelta {
    entities_saved: usize,
    entities_existing: usize,
    entities_new: usize,
    entities_skipped: usize,
    relationships_saved: usize,
    relationships_existing: usize,
    relationships_new: usize,
    relationships_skipped: usize,
}

/// Typed result of one worker task. Retries happen inside the task;
/// whatever escapes lands here, never as a panic or a propagated error.
#[derive(Debug)]
struct TaskOutcome {
    ok: bool,
    reason: Option<String>,
    delta: StatsDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Nodes,
    Edges,
}

impl Phase {
    fn label(&self) -> &'static str {
        match self {
            Phase::Nodes => "nodes",
            Phase::Edges => "edges",
        }
    }
}

/// Two-phase concurrent graph writer. Phase one upserts provenance,
/// entities and MENTIONS edges chunk by chunk under high parallelism;
/// phase two upserts RELATIONSHIP edges under low parallelism, after every
/// endpoint already exists. Conflicted writes retry with linear backoff;
/// chunks that keep failing go to a failure queue that is re-drained a
/// bounded number of rounds.
pub struct GraphWriter {
    graph: Arc<dyn GraphStore>,
    node_workers: usize,
    edge_workers: usize,
    max_attempts: usize,
    drain_rounds: usize,
    backoff_unit: Duration,
    drain_pause: Duration,
}

impl GraphWriter {
    pub fn new(graph: Arc<dyn GraphStore>, config: &PipelineConfig) -> Self {
        Self {
            graph,
            node_workers: config.node_workers.max(1),
            edge_workers: config.edge_workers.max(1),
            max_attempts: config.max_attempts.max(1),
            drain_rounds: config.drain_rounds,
            backoff_unit: Duration::from_millis(500),
            drain_pause: Duration::from_secs(2),
        }
    }

    /// Shrink the wait intervals; used by tests.
    pub fn with_timing(mut self, backoff_unit: Duration, drain_pause: Duration) -> Self {
        self.backoff_unit = backoff_unit;
        self.drain_pause = drain_pause;
        self
    }

    /// Ingest every chunk: all nodes first, then all edges.
    pub async fn run(&self, chunks: Vec<ChunkArtifact>) -> Result<WriterStats> {
        let stats = Arc::new(Mutex::new(WriterStats::default()));

        info!(
            "phase 1: writing nodes for {} chunks ({} workers)",
            chunks.len(),
            self.node_workers
        );
        self.run_phase(Phase::Nodes, chunks.clone(), self.node_workers, &stats)
            .await?;

        info!(
            "phase 2: writing edges for {} chunks ({} workers)",
            chunks.len(),
            self.edge_workers
        );
        self.run_phase(Phase::Edges, chunks, self.edge_workers, &stats)
            .await?;

        let stats = stats.lock().clone();
        info!(
            "writer done: {} chunks ({} failed), entities {} (existing {}, new {}), relationships {} (existing {}, new {})",
            stats.chunks_processed,
            stats.chunks_failed,
            stats.entities_saved,
            stats.entities_existing,
            stats.entities_new,
            stats.relationships_saved,
            stats.relationships_existing,
            stats.relationships_new
        );
        Ok(stats)
    }

    async fn run_phase(
        &self,
        phase: Phase,
        chunks: Vec<ChunkArtifact>,
        workers: usize,
        stats: &Arc<Mutex<WriterStats>>,
    ) -> Result<()> {
        let mut pending = chunks;
        let mut round = 0usize;

        loop {
            // randomized work order spreads writers across hot nodes
            pending.shuffle(&mut rand::rng());

            let failure_queue: Arc<Mutex<Vec<ChunkArtifact>>> = Arc::new(Mutex::new(Vec::new()));
            let semaphore = Arc::new(Semaphore::new(workers));
            let total = pending.len();
            let mut handles = Vec::with_capacity(total);

            for (idx, chunk) in pending.drain(..).enumerate() {
                let graph = Arc::clone(&self.graph);
                let semaphore = Arc::clone(&semaphore);
                let failure_queue = Arc::clone(&failure_queue);
                let stats = Arc::clone(&stats);
                let max_attempts = self.max_attempts;
                let backoff_unit = self.backoff_unit;

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    let outcome = process_with_retry(
                        graph.as_ref(),
                        phase,
                        &chunk,
                        max_attempts,
                        backoff_unit,
                    )
                    .await;

                    let mut guard = stats.lock();
                    guard.apply(&outcome.delta);
                    if outcome.ok {
                        if phase == Phase::Nodes {
                            guard.chunks_processed += 1;
                        }
                        debug!("[{}/{}] {} ok ({})", idx + 1, total, chunk.chunk_id, phase.label());
                    } else {
                        warn!(
                            "[{}/{}] {} failed ({}): {}",
                            idx + 1,
                            total,
                            chunk.chunk_id,
                            phase.label(),
                            outcome.reason.as_deref().unwrap_or("unknown")
                        );
                        drop(guard);
                        failure_queue.lock().push(chunk);
                    }
                }));
            }

            for handle in handles {
                handle
                    .await
                    .map_err(|e| cinegraph_core::CinegraphError::External(format!(
                        "writer task join error: {}",
                        e
                    )))?;
            }

            let failures = std::mem::take(&mut *failure_queue.lock());
            if failures.is_empty() {
                break;
            }

            round += 1;
            if round > self.drain_rounds {
                warn!(
                    "{} drain rounds exhausted for phase {}; {} chunks remain failed",
                    self.drain_rounds,
                    phase.label(),
                    failures.len()
                );
                let mut guard = stats.lock();
                guard.chunks_failed += failures.len();
                guard
                    .failed_chunk_ids
                    .extend(failures.iter().map(|c| c.chunk_id.clone()));
                break;
            }

            info!(
                "phase {} drain round {} ({} chunks)",
                phase.label(),
                round,
                failures.len()
            );
            tokio::time::sleep(self.drain_pause).await;
            pending = failures;
        }

        Ok(())
    }
}

async fn process_with_retry(
    graph: &dyn GraphStore,
    phase: Phase,
    chunk: &ChunkArtifact,
    max_attempts: usize,
    backoff_unit: Duration,
) -> TaskOutcome {
    for attempt in 1..=max_attempts {
        let result = match phase {
            Phase::Nodes => process_nodes(graph, chunk).await,
            Phase::Edges => process_edges(graph, chunk).await,
        };

        match result {
            Ok(delta) => {
                return TaskOutcome {
                    ok: true,
                    reason: None,
                    delta,
                }
            }
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                let wait = backoff_unit * attempt as u32;
                debug!(
                    "{} conflict on attempt {}/{}, retrying in {:?}",
                    chunk.chunk_id, attempt, max_attempts, wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                return TaskOutcome {
                    ok: false,
                    reason: Some(e.to_string()),
                    delta: StatsDelta::default(),
                }
            }
        }
    }

    TaskOutcome {
        ok: false,
        reason: Some("retries exhausted".to_string()),
        delta: StatsDelta::default(),
    }
}

/// Phase 1 for one chunk: provenance, then entities grouped by
/// `(label, canonical name)` with their descriptions accumulated in chunk
/// order, each linked back with a MENTIONS edge.
async fn process_nodes(graph: &dyn GraphStore, chunk: &ChunkArtifact) -> Result<StatsDelta> {
    graph
        .upsert_base_provenance(
            &chunk.movie_id,
            &chunk.reviewer,
            &chunk.chunk_id,
            &chunk.user_query,
        )
        .await?;

    let mut delta = StatsDelta::default();

    let mut order: Vec<(EntityLabel, String)> = Vec::new();
    let mut groups: HashMap<(EntityLabel, String), Vec<String>> = HashMap::new();
    for entity in &chunk.entities {
        let name = chunk.canonical_name(&entity.entity_name).trim().to_string();
        if name.is_empty() || !entity.entity_type.is_valid_identifier() {
            delta.entities_skipped += 1;
            continue;
        }
        let key = (entity.entity_type.clone(), name);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key.clone());
                Vec::new()
            })
            .push(entity.entity_description.clone());
    }

    for key in order {
        let descriptions = groups.remove(&key).unwrap_or_default();
        let (label, name) = key;
        let upsert = graph
            .upsert_entity_with_accumulated_description(&label, &name, &descriptions)
            .await?;
        delta.entities_saved += 1;
        if upsert.was_existing {
            delta.entities_existing += 1;
        } else {
            delta.entities_new += 1;
        }
        graph
            .upsert_mentions_edge(&chunk.chunk_id, &name, &label)
            .await?;
    }

    Ok(delta)
}

/// Phase 2 for one chunk: endpoints canonicalized through the resolution
/// map, grouped by unordered pair with descriptions merged and strength
/// max-reduced, one upsert per pair.
async fn process_edges(graph: &dyn GraphStore, chunk: &ChunkArtifact) -> Result<StatsDelta> {
    let mut delta = StatsDelta::default();

    struct PairGroup {
        first_label: EntityLabel,
        second_label: EntityLabel,
        descriptions: Vec<String>,
        strength: f64,
    }

    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), PairGroup> = HashMap::new();

    for relationship in &chunk.relationships {
        let source = chunk
            .canonical_name(&relationship.source_entity)
            .trim()
            .to_string();
        let target = chunk
            .canonical_name(&relationship.target_entity)
            .trim()
            .to_string();
        let source_label = endpoint_label(chunk, &relationship.source_entity, &relationship.source_type);
        let target_label = endpoint_label(chunk, &relationship.target_entity, &relationship.target_type);

        if source.is_empty()
            || target.is_empty()
            || !source_label.is_valid_identifier()
            || !target_label.is_valid_identifier()
        {
            delta.relationships_skipped += 1;
            continue;
        }

        let strength = relationship.relationship_strength.as_f64();
        let (first, first_label, second, second_label) =
            cinegraph_graph::order_pair(&source, source_label, &target, target_label);
        let key = (first.to_string(), second.to_string());

        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            PairGroup {
                first_label,
                second_label,
                descriptions: Vec::new(),
                strength,
            }
        });
        group
            .descriptions
            .push(relationship.relationship_description.clone());
        group.strength = group.strength.max(strength);
    }

    for key in order {
        let group = groups.remove(&key).expect("grouped above");
        let (first, second) = key;
        let strength = if group.strength.fract() == 0.0 {
            Strength::Int(group.strength as i64)
        } else {
            Strength::Float(group.strength)
        };
        let was_existing = graph
            .upsert_relationship_single(
                &first,
                &group.first_label,
                &second,
                &group.second_label,
                &group.descriptions,
                &strength,
            )
            .await?;
        delta.relationships_saved += 1;
        if was_existing {
            delta.relationships_existing += 1;
        } else {
            delta.relationships_new += 1;
        }
    }

    Ok(delta)
}

/// Best label for a relationship endpoint: the declared type when usable,
/// else whatever the chunk's entity records or resolution map know about
/// the surface name.
fn endpoint_label(chunk: &ChunkArtifact, surface: &str, declared: &EntityLabel) -> EntityLabel {
    if !declared.as_str().is_empty() && declared.is_valid_identifier() {
        return declared.clone();
    }
    if let Some(entity) = chunk
        .entities
        .iter()
        .find(|e| e.entity_name.trim() == surface.trim())
    {
        return entity.entity_type.clone();
    }
    if let Some(entry) = chunk.entity_resolution.get(surface.trim()) {
        return entry.entity_type.clone();
    }
    declared.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::{
        ids, ExtractedEntity, ExtractedRelationship, MatchType, ResolutionEntry,
    };
    use cinegraph_graph::MemoryGraph;

    fn fast_writer(graph: Arc<MemoryGraph>, node_workers: usize, edge_workers: usize) -> GraphWriter {
        let config = PipelineConfig {
            node_workers,
            edge_workers,
            max_attempts: 5,
            drain_rounds: 5,
            ..PipelineConfig::default()
        };
        GraphWriter::new(graph, &config)
            .with_timing(Duration::from_millis(1), Duration::from_millis(1))
    }

    fn chunk_with(
        movie: &str,
        reviewer: &str,
        text: &str,
        entities: Vec<(&str, EntityLabel, &str)>,
        relationships: Vec<(&str, EntityLabel, &str, EntityLabel, &str, i64)>,
    ) -> ChunkArtifact {
        let hash = ids::chunk_hash(text);
        ChunkArtifact {
            chunk_id: ids::chunk_id(reviewer, &hash),
            chunk_hash: hash,
            user_query: text.to_string(),
            movie_id: movie.to_string(),
            reviewer: reviewer.to_string(),
            chunk_index: 1,
            entities: entities
                .into_iter()
                .map(|(name, label, desc)| ExtractedEntity {
                    entity_name: name.to_string(),
                    entity_type: label,
                    entity_description: desc.to_string(),
                })
                .collect(),
            relationships: relationships
                .into_iter()
                .map(|(s, sl, t, tl, desc, strength)| ExtractedRelationship {
                    source_entity: s.to_string(),
                    source_type: sl,
                    target_entity: t.to_string(),
                    target_type: tl,
                    relationship_description: desc.to_string(),
                    relationship_strength: Strength::Int(strength),
                })
                .collect(),
            entity_resolution: Default::default(),
        }
    }

    #[tokio::test]
    async fn nodes_then_edges_with_mentions_and_descriptions() {
        let graph = Arc::new(MemoryGraph::new());
        let chunk = chunk_with(
            "인셉션",
            "rev",
            "코브와 멜",
            vec![
                ("코브", EntityLabel::MovieCharacter, "드림팀 리더"),
                ("멜", EntityLabel::MovieCharacter, "코브의 아내"),
            ],
            vec![(
                "코브",
                EntityLabel::MovieCharacter,
                "멜",
                EntityLabel::MovieCharacter,
                "부부",
                9,
            )],
        );
        let chunk_id = chunk.chunk_id.clone();

        let stats = fast_writer(graph.clone(), 4, 1).run(vec![chunk]).await.unwrap();
        assert_eq!(stats.chunks_processed, 1);
        assert_eq!(stats.chunks_failed, 0);
        assert_eq!(stats.entities_saved, 2);
        assert_eq!(stats.entities_new, 2);
        assert_eq!(stats.relationships_saved, 1);
        assert_eq!(stats.relationships_new, 1);

        let mentions = graph.chunk_mentions(&chunk_id).await.unwrap();
        assert_eq!(mentions.len(), 2);
        assert_eq!(graph.relationship_count("코브", "멜"), 1);
    }

    #[tokio::test]
    async fn replaying_the_same_chunks_is_idempotent() {
        let graph = Arc::new(MemoryGraph::new());
        let chunk = chunk_with(
            "인셉션",
            "rev",
            "톰 하디 이야기",
            vec![("Tom Hardy", EntityLabel::Actor, "played Eames")],
            vec![],
        );

        let writer = fast_writer(graph.clone(), 2, 1);
        let first = writer.run(vec![chunk.clone()]).await.unwrap();
        assert_eq!(first.entities_new, 1);

        let second = fast_writer(graph.clone(), 2, 1).run(vec![chunk]).await.unwrap();
        assert_eq!(second.entities_new, 0);
        assert_eq!(second.entities_existing, 1);
        assert_eq!(
            graph
                .node_descriptions(&EntityLabel::Actor, "Tom Hardy")
                .unwrap(),
            vec!["played Eames".to_string()]
        );
    }

    #[tokio::test]
    async fn resolution_map_canonicalizes_names_and_endpoints() {
        let graph = Arc::new(MemoryGraph::new());
        let mut chunk = chunk_with(
            "인셉션",
            "rev",
            "디카프리오와 코브",
            vec![("디카프리오", EntityLabel::Actor, "주연")],
            vec![(
                "디카프리오",
                EntityLabel::Actor,
                "코브",
                EntityLabel::MovieCharacter,
                "연기",
                8,
            )],
        );
        chunk.entities.push(ExtractedEntity {
            entity_name: "코브".to_string(),
            entity_type: EntityLabel::MovieCharacter,
            entity_description: "리더".to_string(),
        });
        chunk.entity_resolution.insert(
            "디카프리오".to_string(),
            ResolutionEntry {
                resolved_name: "Leonardo DiCaprio".to_string(),
                entity_type: EntityLabel::Actor,
                matched: true,
                match_type: MatchType::SynonymExact,
            },
        );

        fast_writer(graph.clone(), 2, 1).run(vec![chunk]).await.unwrap();

        assert!(graph
            .node_descriptions(&EntityLabel::Actor, "Leonardo DiCaprio")
            .is_some());
        assert!(graph
            .node_descriptions(&EntityLabel::Actor, "디카프리오")
            .is_none());
        assert_eq!(graph.relationship_count("Leonardo DiCaprio", "코브"), 1);
    }

    #[tokio::test]
    async fn conflict_storm_converges_with_one_edge_per_pair() {
        let graph = Arc::new(MemoryGraph::new());
        graph.conflicts.set_rate(0.3);

        let hot_names = ["A", "B", "C", "D", "E"];
        let mut chunks = Vec::new();
        for i in 0..30 {
            let text = format!("chunk {}", i);
            let a = hot_names[i % hot_names.len()];
            let b = hot_names[(i + 1) % hot_names.len()];
            chunks.push(chunk_with(
                "영화",
                "rev",
                &text,
                vec![
                    (a, EntityLabel::Actor, "hot node"),
                    (b, EntityLabel::Actor, "hot node"),
                ],
                vec![(a, EntityLabel::Actor, b, EntityLabel::Actor, "함께 출연", 5)],
            ));
        }

        let stats = fast_writer(graph.clone(), 20, 4).run(chunks).await.unwrap();
        graph.conflicts.set_rate(0.0);

        assert_eq!(stats.chunks_failed, 0, "failed: {:?}", stats.failed_chunk_ids);
        assert_eq!(stats.chunks_processed, 30);
        for i in 0..hot_names.len() {
            let a = hot_names[i];
            let b = hot_names[(i + 1) % hot_names.len()];
            assert_eq!(graph.relationship_count(a, b), 1, "pair {}-{}", a, b);
        }
    }

    #[tokio::test]
    async fn scripted_conflicts_are_retried_within_the_task() {
        let graph = Arc::new(MemoryGraph::new());
        graph.conflicts.fail_next(2);

        let chunk = chunk_with(
            "영화",
            "rev",
            "text",
            vec![("X", EntityLabel::Actor, "d")],
            vec![],
        );
        let stats = fast_writer(graph.clone(), 1, 1).run(vec![chunk]).await.unwrap();
        assert_eq!(stats.chunks_processed, 1);
        assert_eq!(stats.chunks_failed, 0);
    }

    #[tokio::test]
    async fn missing_endpoints_exhaust_the_drain_rounds_and_are_reported() {
        let graph = Arc::new(MemoryGraph::new());
        let chunk = chunk_with(
            "영화",
            "rev",
            "text",
            vec![("X", EntityLabel::Actor, "d")],
            // Y is never written in phase one
            vec![("X", EntityLabel::Actor, "Y", EntityLabel::Actor, "관계", 3)],
        );
        let chunk_id = chunk.chunk_id.clone();

        let stats = fast_writer(graph, 1, 1).run(vec![chunk]).await.unwrap();
        assert_eq!(stats.chunks_failed, 1);
        assert_eq!(stats.failed_chunk_ids, vec![chunk_id]);
        assert_eq!(stats.relationships_saved, 0);
    }

    #[tokio::test]
    async fn empty_chunk_writes_nothing_but_succeeds() {
        let graph = Arc::new(MemoryGraph::new());
        let chunk = chunk_with("영화", "rev", "빈 청크", vec![], vec![]);
        let stats = fast_writer(graph.clone(), 1, 1).run(vec![chunk]).await.unwrap();
        assert_eq!(stats.chunks_processed, 1);
        assert_eq!(stats.entities_saved, 0);
        assert_eq!(stats.relationships_saved, 0);
        // provenance is still recorded
        assert_eq!(graph.all_chunks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let graph = Arc::new(MemoryGraph::new());
        let chunk = chunk_with(
            "영화",
            "rev",
            "text",
            vec![
                ("", EntityLabel::Actor, "이름 없음"),
                ("정상", EntityLabel::Actor, "ok"),
            ],
            vec![(
                "정상",
                EntityLabel::Other(String::new()),
                "",
                EntityLabel::Actor,
                "빈 타깃",
                1,
            )],
        );
        let stats = fast_writer(graph, 1, 1).run(vec![chunk]).await.unwrap();
        assert_eq!(stats.chunks_failed, 0);
        assert_eq!(stats.entities_saved, 1);
        assert_eq!(stats.entities_skipped, 1);
        assert_eq!(stats.relationships_skipped, 1);
    }
}
