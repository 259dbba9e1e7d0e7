use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use cinegraph_ai::{parse_extraction_output, prompts, LlmProvider};
use cinegraph_core::Result;

use crate::artifacts::ArtifactStore;
use crate::catalog::CatalogSource;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStats {
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub entities_extracted: usize,
    pub relationships_extracted: usize,
}

/// Prompt the model once per chunk and persist the parsed entity and
/// relationship records back into the artifact. Chunks that already carry
/// entities are skipped, which makes interrupted runs resumable.
pub async fn run_entity_extraction(
    store: &ArtifactStore,
    catalog: &dyn CatalogSource,
    llm: Arc<dyn LlmProvider>,
) -> Result<ExtractionStats> {
    let artifacts = store.load_all()?;
    let total = artifacts.len();
    info!("extraction over {} chunks", total);

    let mut stats = ExtractionStats::default();

    for (i, mut artifact) in artifacts.into_iter().enumerate() {
        if !artifact.entities.is_empty() {
            stats.chunks_processed += 1;
            continue;
        }

        let context = catalog
            .movie_context(&artifact.movie_id)
            .unwrap_or_else(|| format!("영화: {}", artifact.movie_id));
        let prompt = prompts::extraction_prompt(&context, &artifact.user_query);

        let response = match llm.generate(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "[{}/{}] {} | extraction call failed: {}",
                    i + 1,
                    total,
                    artifact.chunk_id,
                    e
                );
                stats.chunks_failed += 1;
                continue;
            }
        };

        let (entities, relationships) = parse_extraction_output(&response.content);
        info!(
            "[{}/{}] {} | {} entities, {} relationships",
            i + 1,
            total,
            artifact.chunk_id,
            entities.len(),
            relationships.len()
        );

        stats.entities_extracted += entities.len();
        stats.relationships_extracted += relationships.len();

        artifact.entities = entities;
        artifact.relationships = relationships;
        store.save(&artifact)?;
        stats.chunks_processed += 1;
    }

    info!(
        "extraction done: {} chunks, {} entities, {} relationships, {} failed",
        stats.chunks_processed,
        stats.entities_extracted,
        stats.relationships_extracted,
        stats.chunks_failed
    );
    Ok(stats)
}
