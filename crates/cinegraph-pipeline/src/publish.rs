use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use cinegraph_ai::EmbeddingProvider;
use cinegraph_core::{ChunkDoc, EntityDoc, GraphStore, IndexKind, Result, SearchIndex};

use crate::catalog::load_entity_docs;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishStats {
    pub total: usize,
    pub saved: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Propagate summarized entities from the graph into the entity index.
/// The mapping is validated once up front; a dimension mismatch aborts
/// before any write. Each entity either already has its record (skip),
/// has a record under its name+type (update in place), or gets a fresh
/// record keyed by its canonical id.
pub async fn run_entity_to_index(
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<PublishStats> {
    index.validate_mapping(IndexKind::Entities).await?;

    let entities = graph.summarized_entities().await?;
    info!("publishing {} summarized entities", entities.len());

    let mut stats = PublishStats {
        total: entities.len(),
        ..PublishStats::default()
    };

    for entity in &entities {
        if index
            .get_entity_by_canonical_id(&entity.canonical_id)
            .await?
            .is_some()
        {
            stats.skipped += 1;
            continue;
        }

        let summary_vec = match embedder.embed_text(&entity.summary).await {
            Ok(vec) => vec,
            Err(e) => {
                warn!("{} | embedding failed: {}", entity.name, e);
                stats.failed += 1;
                continue;
            }
        };

        // a catalog-imported record may already exist under the name; keep
        // its synonyms and document id
        let existing = index.find_entity_doc(&entity.name, Some(&entity.label)).await?;
        let (doc_id, mut doc) = match existing {
            Some((doc_id, doc)) => {
                stats.updated += 1;
                (doc_id, doc)
            }
            None => {
                stats.saved += 1;
                (
                    entity.canonical_id.clone(),
                    EntityDoc {
                        name: entity.name.clone(),
                        synonym: vec![entity.name.clone()],
                        entity_type: entity.label.clone(),
                        summary: String::new(),
                        summary_vec: Vec::new(),
                        canonical_id: None,
                    },
                )
            }
        };
        doc.summary = entity.summary.clone();
        doc.summary_vec = summary_vec;
        doc.canonical_id = Some(entity.canonical_id.clone());

        if let Err(e) = index.put_entity(&doc_id, &doc).await {
            warn!("{} | index write failed: {}", entity.name, e);
            stats.failed += 1;
        }
    }

    index.refresh(IndexKind::Entities).await?;
    info!(
        "entity publish done: {} saved, {} updated, {} skipped, {} failed of {}",
        stats.saved, stats.updated, stats.skipped, stats.failed, stats.total
    );
    Ok(stats)
}

/// Mirror every graph chunk into the chunk index: embed the text, write
/// `{context, context_vec, canonical_id}` keyed by the chunk id. Bounded
/// worker pool; one refresh at the end of the stage.
pub async fn run_chunks_to_index(
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    workers: usize,
) -> Result<PublishStats> {
    index.validate_mapping(IndexKind::Chunks).await?;

    let chunks = graph.all_chunks().await?;
    info!("publishing {} chunks ({} workers)", chunks.len(), workers);

    let stats = Arc::new(Mutex::new(PublishStats {
        total: chunks.len(),
        ..PublishStats::default()
    }));
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let index = Arc::clone(&index);
        let embedder = Arc::clone(&embedder);
        let semaphore = Arc::clone(&semaphore);
        let stats = Arc::clone(&stats);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if chunk.text.trim().is_empty() {
                warn!("{} | empty text, skipping", chunk.id);
                stats.lock().skipped += 1;
                return;
            }
            let vec = match embedder.embed_text(&chunk.text).await {
                Ok(vec) => vec,
                Err(e) => {
                    warn!("{} | embedding failed: {}", chunk.id, e);
                    stats.lock().failed += 1;
                    return;
                }
            };
            let doc = ChunkDoc {
                context: chunk.text.clone(),
                context_vec: vec,
                canonical_id: chunk.id.clone(),
            };
            match index.put_chunk(&chunk.id, &doc).await {
                Ok(()) => stats.lock().saved += 1,
                Err(e) => {
                    warn!("{} | index write failed: {}", chunk.id, e);
                    stats.lock().failed += 1;
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    index.refresh(IndexKind::Chunks).await?;
    let stats = stats.lock().clone();
    info!(
        "chunk publish done: {} saved, {} skipped, {} failed of {}",
        stats.saved, stats.skipped, stats.failed, stats.total
    );
    Ok(stats)
}

/// One-shot synonym seed: recreate both indices and bulk-import per-entity
/// catalog documents, embedding the summary when the document carries no
/// vector. Returns per-label counts.
pub async fn run_entity_import(
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    docs_dir: &Path,
    workers: usize,
) -> Result<HashMap<String, usize>> {
    index.delete_index(IndexKind::Entities).await?;
    index.delete_index(IndexKind::Chunks).await?;
    index.ensure_indices().await?;

    let docs = load_entity_docs(docs_dir)?;
    info!("importing {} entity documents ({} workers)", docs.len(), workers);

    let counts: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let errors = Arc::new(Mutex::new(0usize));
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(docs.len());

    for (doc_id, mut doc) in docs {
        let index = Arc::clone(&index);
        let embedder = Arc::clone(&embedder);
        let semaphore = Arc::clone(&semaphore);
        let counts = Arc::clone(&counts);
        let errors = Arc::clone(&errors);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if doc.summary_vec.is_empty() && !doc.summary.trim().is_empty() {
                match embedder.embed_text(&doc.summary).await {
                    Ok(vec) => doc.summary_vec = vec,
                    Err(e) => {
                        warn!("{} | embedding failed: {}", doc.name, e);
                        *errors.lock() += 1;
                        return;
                    }
                }
            }
            match index.put_entity(&doc_id, &doc).await {
                Ok(()) => {
                    *counts.lock().entry(doc.entity_type.as_str().to_string()).or_default() += 1;
                }
                Err(e) => {
                    warn!("{} | index write failed: {}", doc.name, e);
                    *errors.lock() += 1;
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    index.refresh(IndexKind::Entities).await?;

    let counts = counts.lock().clone();
    let errors = *errors.lock();
    let imported: usize = counts.values().sum();
    info!("entity import done: {} indexed, {} errors", imported, errors);
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_ai::HashEmbedding;
    use cinegraph_core::{EntityLabel, EMBEDDING_DIM};
    use cinegraph_graph::MemoryGraph;
    use cinegraph_index::MemoryIndex;

    async fn summarized_graph() -> Arc<MemoryGraph> {
        let graph = Arc::new(MemoryGraph::new());
        graph
            .upsert_entity_with_accumulated_description(
                &EntityLabel::Actor,
                "전지현",
                &["암살 주연".to_string()],
            )
            .await
            .unwrap();
        graph
            .write_node_summary(&EntityLabel::Actor, "전지현", "한국 배우, 암살에서 안옥윤 역")
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn entity_publish_creates_records_keyed_by_canonical_id() {
        let graph = summarized_graph().await;
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(HashEmbedding::new());

        let stats = run_entity_to_index(graph.clone(), index.clone(), embedder.clone())
            .await
            .unwrap();
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.failed, 0);

        let entities = graph.summarized_entities().await.unwrap();
        let (_, doc) = index
            .get_entity_by_canonical_id(&entities[0].canonical_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.name, "전지현");
        assert_eq!(doc.summary_vec.len(), EMBEDDING_DIM);
        assert_eq!(doc.synonym, vec!["전지현".to_string()]);
    }

    #[tokio::test]
    async fn entity_publish_is_idempotent() {
        let graph = summarized_graph().await;
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(HashEmbedding::new());

        run_entity_to_index(graph.clone(), index.clone(), embedder.clone())
            .await
            .unwrap();
        let second = run_entity_to_index(graph, index.clone(), embedder)
            .await
            .unwrap();
        assert_eq!(second.saved, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(index.entity_count(), 1);
    }

    #[tokio::test]
    async fn entity_publish_updates_catalog_records_in_place() {
        let graph = summarized_graph().await;
        let index = Arc::new(MemoryIndex::new());
        index
            .put_entity(
                "catalog_doc",
                &EntityDoc {
                    name: "전지현".to_string(),
                    synonym: vec!["지안나 전".to_string(), "전지현".to_string()],
                    entity_type: EntityLabel::Actor,
                    summary: String::new(),
                    summary_vec: Vec::new(),
                    canonical_id: None,
                },
            )
            .await
            .unwrap();

        let stats = run_entity_to_index(graph, index.clone(), Arc::new(HashEmbedding::new()))
            .await
            .unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.saved, 0);

        let doc = index.get_entity("catalog_doc").unwrap();
        assert!(doc.synonym.contains(&"지안나 전".to_string()));
        assert!(doc.canonical_id.is_some());
        assert!(!doc.summary.is_empty());
    }

    #[tokio::test]
    async fn chunk_publish_mirrors_graph_chunks() {
        let graph = Arc::new(MemoryGraph::new());
        graph
            .upsert_base_provenance("암살", "rev", "rev_abc_1", "첫 번째 청크")
            .await
            .unwrap();
        graph
            .upsert_base_provenance("암살", "rev", "rev_abc_2", "")
            .await
            .unwrap();

        let index = Arc::new(MemoryIndex::new());
        let stats = run_chunks_to_index(graph, index.clone(), Arc::new(HashEmbedding::new()), 4)
            .await
            .unwrap();
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.skipped, 1);

        let doc = index.get_chunk("rev_abc_1").unwrap();
        assert_eq!(doc.context, "첫 번째 청크");
        assert_eq!(doc.canonical_id, "rev_abc_1");
        assert_eq!(doc.context_vec.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn wrong_mapping_aborts_before_any_write() {
        let graph = summarized_graph().await;
        let index = Arc::new(MemoryIndex::with_mapped_dimension(768));
        let err = run_entity_to_index(graph, index.clone(), Arc::new(HashEmbedding::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, cinegraph_core::CinegraphError::Configuration(_)));
        assert_eq!(index.entity_count(), 0);
    }

    #[tokio::test]
    async fn entity_import_embeds_and_counts_by_label() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Jun_Ji_hyun_ACTOR_0001.json"),
            serde_json::json!({
                "entity": {
                    "name": "전지현",
                    "entity_type": "ACTOR",
                    "summary": "한국 배우",
                    "synonym": ["지안나 전"]
                }
            })
            .to_string(),
        )
        .unwrap();

        let index = Arc::new(MemoryIndex::new());
        let counts = run_entity_import(
            index.clone(),
            Arc::new(HashEmbedding::new()),
            dir.path(),
            4,
        )
        .await
        .unwrap();
        assert_eq!(counts.get("ACTOR"), Some(&1));

        let doc = index.get_entity("Jun_Ji_hyun_ACTOR_0001").unwrap();
        assert_eq!(doc.summary_vec.len(), EMBEDDING_DIM);
    }
}
