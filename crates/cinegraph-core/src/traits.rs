use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    CanonicalIdAssignment, ChunkNode, EdgeSummaryCandidate, EntityLabel, EntityPromptInfo,
    EntityUpsert, GraphStats, MentionedEntity, NeighborRow, NodeSummaryCandidate, Result,
    Strength, SummarizedEntity,
};

/// Read/write contract over the labeled property graph. Nodes are keyed by
/// `(label, name)`; exactly one RELATIONSHIP edge may exist per unordered
/// pair of domain nodes. Implementations must be safe for concurrent use and
/// surface optimistic-concurrency rejections as conflict errors.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// MERGE the movie, reviewer and chunk nodes plus HAS_CHUNK/WRITTEN_BY
    /// provenance edges for one chunk.
    async fn upsert_base_provenance(
        &self,
        movie_id: &str,
        reviewer_id: &str,
        chunk_id: &str,
        chunk_text: &str,
    ) -> Result<()>;

    /// MERGE an entity node, appending `new_descriptions` to the stored
    /// description list (set-dedup, insertion order preserved). Assigns a
    /// canonical id on first create and preserves it afterwards.
    async fn upsert_entity_with_accumulated_description(
        &self,
        label: &EntityLabel,
        name: &str,
        new_descriptions: &[String],
    ) -> Result<EntityUpsert>;

    /// MERGE the MENTIONS edge from an existing chunk to an entity node.
    async fn upsert_mentions_edge(
        &self,
        chunk_id: &str,
        entity_name: &str,
        entity_label: &EntityLabel,
    ) -> Result<()>;

    /// Replace-with-merge for the single RELATIONSHIP edge between one
    /// unordered endpoint pair: read existing descriptions, delete any edges
    /// between the two nodes, recreate exactly one edge with the merged
    /// deduplicated list and max-reduced strength. Returns whether an edge
    /// already existed.
    async fn upsert_relationship_single(
        &self,
        name_a: &str,
        label_a: &EntityLabel,
        name_b: &str,
        label_b: &EntityLabel,
        new_descriptions: &[String],
        strength: &Strength,
    ) -> Result<bool>;

    /// Domain nodes with descriptions but no summary yet, excluding
    /// provenance labels.
    async fn node_summary_candidates(&self) -> Result<Vec<NodeSummaryCandidate>>;

    async fn edge_summary_candidates(&self) -> Result<Vec<EdgeSummaryCandidate>>;

    async fn write_node_summary(
        &self,
        label: &EntityLabel,
        name: &str,
        summary: &str,
    ) -> Result<()>;

    async fn write_edge_summary(
        &self,
        name_a: &str,
        name_b: &str,
        summary: &str,
    ) -> Result<()>;

    /// Assign a canonical id when absent; an existing id is never replaced.
    async fn assign_canonical_id(
        &self,
        label: &EntityLabel,
        name: &str,
    ) -> Result<CanonicalIdAssignment>;

    /// Entities ready for index publication: summary and canonical id both
    /// present, provenance labels excluded.
    async fn summarized_entities(&self) -> Result<Vec<SummarizedEntity>>;

    async fn all_chunks(&self) -> Result<Vec<ChunkNode>>;

    /// Entities reachable from a chunk via MENTIONS.
    async fn chunk_mentions(&self, chunk_id: &str) -> Result<Vec<MentionedEntity>>;

    /// RELATIONSHIP rows one hop out from an entity, excluding chunk and
    /// reviewer nodes. Edges are undirected at read time.
    async fn one_hop(&self, entity_name: &str) -> Result<Vec<NeighborRow>>;

    /// Breadth-first expansion to `hops` hops built on [`Self::one_hop`].
    async fn entity_neighborhood(
        &self,
        entity_name: &str,
        hops: usize,
    ) -> Result<Vec<NeighborRow>> {
        let mut rows = Vec::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert(entity_name.to_string());
        let mut frontier = vec![entity_name.to_string()];
        for _ in 0..hops.max(1) {
            let mut next = Vec::new();
            for name in frontier.drain(..) {
                for row in self.one_hop(&name).await? {
                    if seen.insert(row.target.clone()) {
                        next.push(row.target.clone());
                    }
                    rows.push(row);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(rows)
    }

    /// Label and agentic `prompt` property for each named entity.
    async fn entity_prompts(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, EntityPromptInfo>>;

    /// Run a caller-supplied read query. Not every backend can honor this;
    /// the default declines and the caller degrades gracefully.
    async fn raw_query(&self, cypher: &str) -> Result<Vec<Map<String, Value>>> {
        let _ = cypher;
        Err(crate::CinegraphError::InvalidOperation(
            "raw queries are not supported by this graph backend".to_string(),
        ))
    }

    async fn clear_all(&self) -> Result<()>;

    async fn stats(&self) -> Result<GraphStats>;
}

/// A search-index entity document: the synonym directory entry for one
/// canonical entity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EntityDoc {
    pub name: String,
    #[serde(default)]
    pub synonym: Vec<String>,
    pub entity_type: EntityLabel,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary_vec: Vec<f32>,
    #[serde(default)]
    pub canonical_id: Option<String>,
}

/// A search-index chunk document mirroring a graph chunk for vector
/// retrieval.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChunkDoc {
    pub context: String,
    pub context_vec: Vec<f32>,
    pub canonical_id: String,
}

/// A KNN hit from the chunk index.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub doc_id: String,
    pub canonical_id: String,
    pub context: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Entities,
    Chunks,
}

/// Typed contract over the lexical/vector document store. One index for
/// entities (synonym directory + summary vectors), one for chunks.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create both indices with the expected mapping when missing.
    async fn ensure_indices(&self) -> Result<()>;

    /// Verify the vector field type and dimension. A mismatch is a fatal
    /// configuration error and must be raised before any write.
    async fn validate_mapping(&self, index: IndexKind) -> Result<()>;

    async fn delete_index(&self, index: IndexKind) -> Result<()>;

    async fn refresh(&self, index: IndexKind) -> Result<()>;

    async fn count(&self, index: IndexKind) -> Result<usize>;

    /// Keyword/analyzed match against `entity.name`, filtered by type and
    /// thresholded; returns the stored canonical name.
    async fn search_name_exact(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>>;

    /// Term match against the synonym field, filtered by type.
    async fn search_synonym_exact(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>>;

    /// Substring match over synonyms, filtered by type.
    async fn search_synonym_partial(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>>;

    /// Fetch a full entity document by name (any type unless given).
    async fn find_entity_doc(
        &self,
        name: &str,
        entity_type: Option<&EntityLabel>,
    ) -> Result<Option<(String, EntityDoc)>>;

    async fn get_entity_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<(String, EntityDoc)>>;

    async fn put_entity(&self, doc_id: &str, doc: &EntityDoc) -> Result<()>;

    /// Replace the synonym set of an existing document in a single update.
    async fn update_synonyms(&self, doc_id: &str, synonyms: &[String]) -> Result<()>;

    async fn put_chunk(&self, doc_id: &str, doc: &ChunkDoc) -> Result<()>;

    async fn knn_chunks(&self, vector: &[f32], k: usize) -> Result<Vec<ChunkHit>>;
}
