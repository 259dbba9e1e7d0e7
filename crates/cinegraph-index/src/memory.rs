use async_trait::async_trait;
use dashmap::DashMap;

use cinegraph_core::{
    ChunkDoc, ChunkHit, CinegraphError, EntityDoc, EntityLabel, IndexKind, Result, SearchIndex,
    EMBEDDING_DIM,
};

/// In-process search index with the same lookup semantics as the OpenSearch
/// adapter, minus lexical scoring: name matches are exact-after-trim.
/// Backs resolution, publishing and retrieval tests.
pub struct MemoryIndex {
    entities: DashMap<String, EntityDoc>,
    chunks: DashMap<String, ChunkDoc>,
    /// Dimension the index was "created" with; lets tests exercise the
    /// fatal-mismatch path.
    mapped_dimension: usize,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self {
            entities: DashMap::new(),
            chunks: DashMap::new(),
            mapped_dimension: EMBEDDING_DIM,
        }
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapped_dimension(dimension: usize) -> Self {
        Self {
            mapped_dimension: dimension,
            ..Self::default()
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn get_entity(&self, doc_id: &str) -> Option<EntityDoc> {
        self.entities.get(doc_id).map(|d| d.clone())
    }

    pub fn get_chunk(&self, doc_id: &str) -> Option<ChunkDoc> {
        self.chunks.get(doc_id).map(|d| d.clone())
    }

    fn l2_score(a: &[f32], b: &[f32]) -> f32 {
        let dist_sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
        1.0 / (1.0 + dist_sq)
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn ensure_indices(&self) -> Result<()> {
        self.validate_mapping(IndexKind::Entities).await?;
        self.validate_mapping(IndexKind::Chunks).await
    }

    async fn validate_mapping(&self, index: IndexKind) -> Result<()> {
        if self.mapped_dimension != EMBEDDING_DIM {
            let field = match index {
                IndexKind::Entities => "entity.summary_vec",
                IndexKind::Chunks => "chunk.context_vec",
            };
            return Err(CinegraphError::Configuration(format!(
                "field {} has dimension {}, expected {}",
                field, self.mapped_dimension, EMBEDDING_DIM
            )));
        }
        Ok(())
    }

    async fn delete_index(&self, index: IndexKind) -> Result<()> {
        match index {
            IndexKind::Entities => self.entities.clear(),
            IndexKind::Chunks => self.chunks.clear(),
        }
        Ok(())
    }

    async fn refresh(&self, _index: IndexKind) -> Result<()> {
        Ok(())
    }

    async fn count(&self, index: IndexKind) -> Result<usize> {
        Ok(match index {
            IndexKind::Entities => self.entities.len(),
            IndexKind::Chunks => self.chunks.len(),
        })
    }

    async fn search_name_exact(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>> {
        let name = name.trim();
        Ok(self
            .entities
            .iter()
            .find(|doc| doc.entity_type == *entity_type && doc.name.trim() == name)
            .map(|doc| doc.name.trim().to_string()))
    }

    async fn search_synonym_exact(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>> {
        let name = name.trim();
        Ok(self
            .entities
            .iter()
            .find(|doc| {
                doc.entity_type == *entity_type && doc.synonym.iter().any(|s| s.trim() == name)
            })
            .map(|doc| doc.name.trim().to_string()))
    }

    async fn search_synonym_partial(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(self
            .entities
            .iter()
            .find(|doc| {
                doc.entity_type == *entity_type && doc.synonym.iter().any(|s| s.contains(name))
            })
            .map(|doc| doc.name.trim().to_string()))
    }

    async fn find_entity_doc(
        &self,
        name: &str,
        entity_type: Option<&EntityLabel>,
    ) -> Result<Option<(String, EntityDoc)>> {
        let name = name.trim();
        Ok(self
            .entities
            .iter()
            .find(|doc| {
                doc.name.trim() == name
                    && entity_type.map_or(true, |t| doc.entity_type == *t)
            })
            .map(|doc| (doc.key().clone(), doc.value().clone())))
    }

    async fn get_entity_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<(String, EntityDoc)>> {
        if let Some(doc) = self.entities.get(canonical_id) {
            return Ok(Some((canonical_id.to_string(), doc.clone())));
        }
        Ok(self
            .entities
            .iter()
            .find(|doc| doc.canonical_id.as_deref() == Some(canonical_id))
            .map(|doc| (doc.key().clone(), doc.value().clone())))
    }

    async fn put_entity(&self, doc_id: &str, doc: &EntityDoc) -> Result<()> {
        if !doc.summary_vec.is_empty() && doc.summary_vec.len() != EMBEDDING_DIM {
            return Err(CinegraphError::Configuration(format!(
                "summary_vec has {} dims, expected {}",
                doc.summary_vec.len(),
                EMBEDDING_DIM
            )));
        }
        self.entities.insert(doc_id.to_string(), doc.clone());
        Ok(())
    }

    async fn update_synonyms(&self, doc_id: &str, synonyms: &[String]) -> Result<()> {
        let mut doc = self
            .entities
            .get_mut(doc_id)
            .ok_or_else(|| CinegraphError::NotFound(format!("doc {}", doc_id)))?;
        doc.synonym = synonyms.to_vec();
        Ok(())
    }

    async fn put_chunk(&self, doc_id: &str, doc: &ChunkDoc) -> Result<()> {
        if doc.context_vec.len() != EMBEDDING_DIM {
            return Err(CinegraphError::Configuration(format!(
                "context_vec has {} dims, expected {}",
                doc.context_vec.len(),
                EMBEDDING_DIM
            )));
        }
        self.chunks.insert(doc_id.to_string(), doc.clone());
        Ok(())
    }

    async fn knn_chunks(&self, vector: &[f32], k: usize) -> Result<Vec<ChunkHit>> {
        let mut hits: Vec<ChunkHit> = self
            .chunks
            .iter()
            .map(|entry| ChunkHit {
                doc_id: entry.key().clone(),
                canonical_id: entry.value().canonical_id.clone(),
                context: entry.value().context.clone(),
                score: Self::l2_score(vector, &entry.value().context_vec),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
