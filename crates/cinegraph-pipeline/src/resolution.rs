use serde::Serialize;
use tracing::{debug, info};

use cinegraph_core::{MatchType, ResolutionEntry, Result};
use cinegraph_index::CanonicalRegistry;

use crate::artifacts::ArtifactStore;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionStats {
    pub chunks_processed: usize,
    pub entities_matched: usize,
    pub entities_new: usize,
    pub name_exact: usize,
    pub synonym_exact: usize,
    pub synonym_partial: usize,
    pub endpoints_matched: usize,
    pub endpoints_new: usize,
}

impl ResolutionStats {
    fn record_match_type(&mut self, match_type: MatchType) {
        match match_type {
            MatchType::NameExact => self.name_exact += 1,
            MatchType::SynonymExact => self.synonym_exact += 1,
            MatchType::SynonymPartial => self.synonym_partial += 1,
            MatchType::NotFound => {}
        }
    }
}

/// Build each chunk's resolution map: every extracted surface name plus
/// every relationship endpoint is resolved against the registry, and the
/// outcome is persisted with the artifact. An unmatched name keeps its
/// surface form and the writer will create a new node for it.
pub async fn run_entity_resolution(
    store: &ArtifactStore,
    registry: &CanonicalRegistry,
) -> Result<ResolutionStats> {
    let artifacts = store.load_all()?;
    let total = artifacts.len();
    info!("resolution over {} chunks", total);

    let mut stats = ResolutionStats::default();

    for mut artifact in artifacts {
        let mut map = artifact.entity_resolution.clone();

        for entity in &artifact.entities {
            let surface = entity.entity_name.trim();
            if surface.is_empty() || map.contains_key(surface) {
                continue;
            }
            let outcome = registry.resolve(surface, &entity.entity_type).await;
            if outcome.matched {
                stats.entities_matched += 1;
                stats.record_match_type(outcome.match_type);
                if outcome.resolved_name != surface {
                    debug!("'{}' -> '{}'", surface, outcome.resolved_name);
                }
            } else {
                stats.entities_new += 1;
            }
            map.insert(
                surface.to_string(),
                ResolutionEntry {
                    resolved_name: outcome.resolved_name,
                    entity_type: entity.entity_type.clone(),
                    matched: outcome.matched,
                    match_type: outcome.match_type,
                },
            );
        }

        for relationship in &artifact.relationships {
            for (surface, entity_type) in [
                (&relationship.source_entity, &relationship.source_type),
                (&relationship.target_entity, &relationship.target_type),
            ] {
                let surface = surface.trim();
                if surface.is_empty() || map.contains_key(surface) {
                    continue;
                }
                let outcome = registry.resolve(surface, entity_type).await;
                if outcome.matched {
                    stats.endpoints_matched += 1;
                } else {
                    stats.endpoints_new += 1;
                }
                map.insert(
                    surface.to_string(),
                    ResolutionEntry {
                        resolved_name: outcome.resolved_name,
                        entity_type: entity_type.clone(),
                        matched: outcome.matched,
                        match_type: outcome.match_type,
                    },
                );
            }
        }

        artifact.entity_resolution = map;
        store.save(&artifact)?;
        stats.chunks_processed += 1;
    }

    info!(
        "resolution done: {} chunks, {} matched ({} name, {} synonym, {} partial), {} new",
        stats.chunks_processed,
        stats.entities_matched,
        stats.name_exact,
        stats.synonym_exact,
        stats.synonym_partial,
        stats.entities_new
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cinegraph_core::{
        ids, ChunkArtifact, EntityDoc, EntityLabel, ExtractedEntity, ExtractedRelationship,
        SearchIndex, Strength,
    };
    use cinegraph_index::MemoryIndex;

    async fn seeded_registry() -> CanonicalRegistry {
        let index = MemoryIndex::new();
        index
            .put_entity(
                "doc1",
                &EntityDoc {
                    name: "Leonardo DiCaprio".to_string(),
                    synonym: vec!["디카프리오".to_string()],
                    entity_type: EntityLabel::Actor,
                    summary: String::new(),
                    summary_vec: Vec::new(),
                    canonical_id: None,
                },
            )
            .await
            .unwrap();
        CanonicalRegistry::new(Arc::new(index), false)
    }

    fn artifact_with_records(store: &ArtifactStore) {
        let text = "리뷰 텍스트";
        let hash = ids::chunk_hash(text);
        let artifact = ChunkArtifact {
            chunk_id: ids::chunk_id("rev", &hash),
            chunk_hash: hash,
            user_query: text.to_string(),
            movie_id: "인셉션".to_string(),
            reviewer: "rev".to_string(),
            chunk_index: 1,
            entities: vec![
                ExtractedEntity {
                    entity_name: "디카프리오".to_string(),
                    entity_type: EntityLabel::Actor,
                    entity_description: "주연 배우".to_string(),
                },
                ExtractedEntity {
                    entity_name: "Unknown Person".to_string(),
                    entity_type: EntityLabel::MovieStaff,
                    entity_description: "스태프".to_string(),
                },
            ],
            relationships: vec![ExtractedRelationship {
                source_entity: "디카프리오".to_string(),
                source_type: EntityLabel::Actor,
                target_entity: "코브".to_string(),
                target_type: EntityLabel::MovieCharacter,
                relationship_description: "연기".to_string(),
                relationship_strength: Strength::Int(9),
            }],
            entity_resolution: Default::default(),
        };
        store.save(&artifact).unwrap();
    }

    #[tokio::test]
    async fn resolution_map_covers_entities_and_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        artifact_with_records(&store);
        let registry = seeded_registry().await;

        let stats = run_entity_resolution(&store, &registry).await.unwrap();
        assert_eq!(stats.chunks_processed, 1);
        assert_eq!(stats.entities_matched, 1);
        assert_eq!(stats.entities_new, 1);
        assert_eq!(stats.synonym_exact, 1);
        // 코브 is the only endpoint not already covered by the entity pass
        assert_eq!(stats.endpoints_matched + stats.endpoints_new, 1);

        let loaded = store.load_all().unwrap();
        let map = &loaded[0].entity_resolution;
        assert_eq!(map["디카프리오"].resolved_name, "Leonardo DiCaprio");
        assert!(map["디카프리오"].matched);
        assert_eq!(map["디카프리오"].match_type, MatchType::SynonymExact);
        assert_eq!(map["Unknown Person"].resolved_name, "Unknown Person");
        assert!(!map["Unknown Person"].matched);
        assert!(map.contains_key("코브"));
    }

    #[tokio::test]
    async fn rerun_reuses_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        artifact_with_records(&store);
        let registry = seeded_registry().await;

        let first = run_entity_resolution(&store, &registry).await.unwrap();
        let second = run_entity_resolution(&store, &registry).await.unwrap();
        assert_eq!(first.chunks_processed, second.chunks_processed);
        // all surfaces already resolved; nothing new is looked up
        assert_eq!(second.entities_matched + second.entities_new, 0);
    }
}
