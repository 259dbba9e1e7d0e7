use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use cinegraph_core::{
    ids, CanonicalIdAssignment, ChunkNode, CinegraphError, EdgeSummaryCandidate, EntityLabel,
    EntityPromptInfo, EntityUpsert, GraphStats, GraphStore, MentionedEntity, NeighborRow,
    NodeSummaryCandidate, Result, Strength, SummarizedEntity,
};

use crate::accumulate::{merge_descriptions, order_pair};

type NodeKey = (String, String); // (label, name)

#[derive(Debug, Clone, Default)]
struct NodeRecord {
    descriptions: Vec<String>,
    summary: Option<String>,
    canonical_id: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Clone)]
struct EdgeRecord {
    first: String,
    second: String,
    first_label: EntityLabel,
    second_label: EntityLabel,
    descriptions: Vec<String>,
    summary: Option<String>,
    strength: f64,
}

#[derive(Debug, Clone)]
struct ChunkState {
    text: String,
    canonical_id: String,
    movie_id: String,
    reviewer: String,
    mentions: Vec<NodeKey>,
}

/// Injects store-style optimistic-concurrency rejections into mutating
/// operations. Either a scripted count of upcoming failures or a
/// probabilistic rate; both can be live-tuned from tests.
#[derive(Default)]
pub struct ConflictInjector {
    scripted: AtomicUsize,
    rate: Mutex<f64>,
}

impl ConflictInjector {
    /// Fail the next `n` mutating operations.
    pub fn fail_next(&self, n: usize) {
        self.scripted.fetch_add(n, Ordering::SeqCst);
    }

    /// Fail each mutating operation with probability `rate`.
    pub fn set_rate(&self, rate: f64) {
        *self.rate.lock() = rate.clamp(0.0, 1.0);
    }

    fn check(&self) -> Result<()> {
        loop {
            let current = self.scripted.load(Ordering::SeqCst);
            if current == 0 {
                break;
            }
            if self
                .scripted
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(conflict());
            }
        }
        let rate = *self.rate.lock();
        if rate > 0.0 && rand::rng().random::<f64>() < rate {
            return Err(conflict());
        }
        Ok(())
    }
}

fn conflict() -> CinegraphError {
    CinegraphError::Conflict("ConcurrentModificationException: conflicting write".to_string())
}

/// In-process graph store with the same contract as the openCypher adapter.
/// Backs local runs and is the harness for writer-concurrency tests.
#[derive(Default)]
pub struct MemoryGraph {
    nodes: DashMap<NodeKey, NodeRecord>,
    edges: DashMap<(String, String), EdgeRecord>,
    chunks: DashMap<String, ChunkState>,
    pub conflicts: ConflictInjector,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agentic prompt property on an existing node.
    pub fn set_prompt(&self, label: &EntityLabel, name: &str, prompt: &str) {
        let key = (label.as_str().to_string(), name.to_string());
        if let Some(mut node) = self.nodes.get_mut(&key) {
            node.prompt = Some(prompt.to_string());
        }
    }

    /// Number of RELATIONSHIP edges between two names, any orientation.
    pub fn relationship_count(&self, name_a: &str, name_b: &str) -> usize {
        let (first, _, second, _) = order_pair(name_a, (), name_b, ());
        self.edges
            .iter()
            .filter(|e| e.key().0 == first && e.key().1 == second)
            .count()
    }

    pub fn node_descriptions(&self, label: &EntityLabel, name: &str) -> Option<Vec<String>> {
        self.nodes
            .get(&(label.as_str().to_string(), name.to_string()))
            .map(|n| n.descriptions.clone())
    }

    fn find_node_by_name(&self, name: &str) -> Option<(NodeKey, NodeRecord)> {
        self.nodes
            .iter()
            .find(|entry| entry.key().1 == name)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    fn node_exists(&self, label: &EntityLabel, name: &str) -> bool {
        self.nodes
            .contains_key(&(label.as_str().to_string(), name.to_string()))
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn upsert_base_provenance(
        &self,
        movie_id: &str,
        reviewer_id: &str,
        chunk_id: &str,
        chunk_text: &str,
    ) -> Result<()> {
        self.conflicts.check()?;

        self.nodes
            .entry(("REVIEWER".to_string(), reviewer_id.to_string()))
            .or_insert_with(|| NodeRecord {
                canonical_id: Some(ids::canonical_id(reviewer_id, &EntityLabel::Reviewer)),
                ..NodeRecord::default()
            });
        self.nodes
            .entry(("MOVIE".to_string(), movie_id.to_string()))
            .or_insert_with(|| NodeRecord {
                canonical_id: Some(ids::canonical_id(movie_id, &EntityLabel::Movie)),
                ..NodeRecord::default()
            });
        self.chunks
            .entry(chunk_id.to_string())
            .and_modify(|c| c.text = chunk_text.to_string())
            .or_insert_with(|| ChunkState {
                text: chunk_text.to_string(),
                canonical_id: format!("__Chunk___{}", chunk_id),
                movie_id: movie_id.to_string(),
                reviewer: reviewer_id.to_string(),
                mentions: Vec::new(),
            });
        Ok(())
    }

    async fn upsert_entity_with_accumulated_description(
        &self,
        label: &EntityLabel,
        name: &str,
        new_descriptions: &[String],
    ) -> Result<EntityUpsert> {
        self.conflicts.check()?;

        let key = (label.as_str().to_string(), name.to_string());
        let mut entry = self.nodes.entry(key).or_default();
        let was_existing = entry.canonical_id.is_some() || !entry.descriptions.is_empty();
        entry.descriptions = merge_descriptions(&entry.descriptions, new_descriptions);
        if entry.canonical_id.is_none() {
            entry.canonical_id = Some(ids::canonical_id(name, label));
        }
        Ok(EntityUpsert {
            canonical_id: entry.canonical_id.clone().expect("assigned above"),
            was_existing,
        })
    }

    async fn upsert_mentions_edge(
        &self,
        chunk_id: &str,
        entity_name: &str,
        entity_label: &EntityLabel,
    ) -> Result<()> {
        self.conflicts.check()?;

        if !self.node_exists(entity_label, entity_name) {
            return Err(CinegraphError::Graph(format!(
                "entity not found: {} ({})",
                entity_name, entity_label
            )));
        }
        let mut chunk = self.chunks.get_mut(chunk_id).ok_or_else(|| {
            CinegraphError::Graph(format!("chunk not found: {}", chunk_id))
        })?;
        let key = (entity_label.as_str().to_string(), entity_name.to_string());
        if !chunk.mentions.contains(&key) {
            chunk.mentions.push(key);
        }
        Ok(())
    }

    async fn upsert_relationship_single(
        &self,
        name_a: &str,
        label_a: &EntityLabel,
        name_b: &str,
        label_b: &EntityLabel,
        new_descriptions: &[String],
        strength: &Strength,
    ) -> Result<bool> {
        self.conflicts.check()?;

        let (first, first_label, second, second_label) =
            order_pair(name_a, label_a.clone(), name_b, label_b.clone());

        // CREATE matches both endpoints; an absent endpoint means phase one
        // has not written it yet and the caller must come back later.
        if !self.node_exists(&first_label, first) || !self.node_exists(&second_label, second) {
            return Err(CinegraphError::Graph(format!(
                "relationship endpoints missing: {} ({}) / {} ({})",
                first, first_label, second, second_label
            )));
        }

        let key = (first.to_string(), second.to_string());
        let mut was_existing = false;
        self.edges
            .entry(key)
            .and_modify(|edge| {
                was_existing = true;
                edge.descriptions = merge_descriptions(&edge.descriptions, new_descriptions);
                edge.strength = edge.strength.max(strength.as_f64());
            })
            .or_insert_with(|| EdgeRecord {
                first: first.to_string(),
                second: second.to_string(),
                first_label,
                second_label,
                descriptions: merge_descriptions(&[], new_descriptions),
                summary: None,
                strength: strength.as_f64(),
            });
        Ok(was_existing)
    }

    async fn node_summary_candidates(&self) -> Result<Vec<NodeSummaryCandidate>> {
        let mut out: Vec<NodeSummaryCandidate> = self
            .nodes
            .iter()
            .filter(|entry| {
                let label: EntityLabel = entry.key().0.parse().expect("infallible");
                !label.is_provenance()
                    && !entry.value().descriptions.is_empty()
                    && entry.value().summary.is_none()
            })
            .map(|entry| NodeSummaryCandidate {
                name: entry.key().1.clone(),
                label: entry.key().0.parse().expect("infallible"),
                descriptions: entry.value().descriptions.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn edge_summary_candidates(&self) -> Result<Vec<EdgeSummaryCandidate>> {
        let mut out: Vec<EdgeSummaryCandidate> = self
            .edges
            .iter()
            .filter(|entry| entry.value().summary.is_none() && !entry.value().descriptions.is_empty())
            .map(|entry| EdgeSummaryCandidate {
                source_name: entry.value().first.clone(),
                target_name: entry.value().second.clone(),
                descriptions: entry.value().descriptions.clone(),
            })
            .collect();
        out.sort_by(|a, b| (&a.source_name, &a.target_name).cmp(&(&b.source_name, &b.target_name)));
        Ok(out)
    }

    async fn write_node_summary(
        &self,
        label: &EntityLabel,
        name: &str,
        summary: &str,
    ) -> Result<()> {
        self.conflicts.check()?;
        let key = (label.as_str().to_string(), name.to_string());
        let mut node = self
            .nodes
            .get_mut(&key)
            .ok_or_else(|| CinegraphError::NotFound(format!("{} ({})", name, label)))?;
        node.summary = Some(summary.to_string());
        Ok(())
    }

    async fn write_edge_summary(&self, name_a: &str, name_b: &str, summary: &str) -> Result<()> {
        self.conflicts.check()?;
        let (first, _, second, _) = order_pair(name_a, (), name_b, ());
        let mut edge = self
            .edges
            .get_mut(&(first.to_string(), second.to_string()))
            .ok_or_else(|| {
                CinegraphError::NotFound(format!("relationship {} -- {}", name_a, name_b))
            })?;
        edge.summary = Some(summary.to_string());
        Ok(())
    }

    async fn assign_canonical_id(
        &self,
        label: &EntityLabel,
        name: &str,
    ) -> Result<CanonicalIdAssignment> {
        self.conflicts.check()?;
        let key = (label.as_str().to_string(), name.to_string());
        let mut node = self
            .nodes
            .get_mut(&key)
            .ok_or_else(|| CinegraphError::NotFound(format!("{} ({})", name, label)))?;
        if let Some(existing) = &node.canonical_id {
            return Ok(CanonicalIdAssignment {
                canonical_id: existing.clone(),
                created_new: false,
            });
        }
        let canonical_id = ids::canonical_id(name, label);
        node.canonical_id = Some(canonical_id.clone());
        Ok(CanonicalIdAssignment {
            canonical_id,
            created_new: true,
        })
    }

    async fn summarized_entities(&self) -> Result<Vec<SummarizedEntity>> {
        let mut out: Vec<SummarizedEntity> = self
            .nodes
            .iter()
            .filter_map(|entry| {
                let label: EntityLabel = entry.key().0.parse().expect("infallible");
                if label.is_provenance() {
                    return None;
                }
                let summary = entry.value().summary.clone()?;
                let canonical_id = entry.value().canonical_id.clone()?;
                Some(SummarizedEntity {
                    name: entry.key().1.clone(),
                    label,
                    summary,
                    canonical_id,
                })
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn all_chunks(&self) -> Result<Vec<ChunkNode>> {
        let mut out: Vec<ChunkNode> = self
            .chunks
            .iter()
            .map(|entry| ChunkNode {
                id: entry.key().clone(),
                text: entry.value().text.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn chunk_mentions(&self, chunk_id: &str) -> Result<Vec<MentionedEntity>> {
        let chunk = self
            .chunks
            .get(chunk_id)
            .ok_or_else(|| CinegraphError::NotFound(format!("chunk {}", chunk_id)))?;
        Ok(chunk
            .mentions
            .iter()
            .filter_map(|key| {
                let node = self.nodes.get(key)?;
                Some(MentionedEntity {
                    name: key.1.clone(),
                    label: key.0.parse().expect("infallible"),
                    description: node.descriptions.clone(),
                    canonical_id: node.canonical_id.clone(),
                })
            })
            .collect())
    }

    async fn one_hop(&self, entity_name: &str) -> Result<Vec<NeighborRow>> {
        let mut rows = Vec::new();
        for entry in self.edges.iter() {
            let edge = entry.value();
            let (target, target_label) = if edge.first == entity_name {
                (edge.second.clone(), edge.second_label.clone())
            } else if edge.second == entity_name {
                (edge.first.clone(), edge.first_label.clone())
            } else {
                continue;
            };
            if target_label == EntityLabel::Reviewer {
                continue;
            }
            let target_description = self
                .nodes
                .get(&(target_label.as_str().to_string(), target.clone()))
                .map(|n| n.descriptions.clone())
                .unwrap_or_default();
            rows.push(NeighborRow {
                source: entity_name.to_string(),
                relationship: "RELATIONSHIP".to_string(),
                target,
                target_label,
                target_description,
                rel_description: edge.descriptions.clone(),
            });
        }
        rows.sort_by(|a, b| a.target.cmp(&b.target));
        Ok(rows)
    }

    async fn entity_prompts(&self, names: &[String]) -> Result<HashMap<String, EntityPromptInfo>> {
        let mut out = HashMap::new();
        for name in names {
            if let Some((key, node)) = self.find_node_by_name(name) {
                out.insert(
                    name.clone(),
                    EntityPromptInfo {
                        label: key.0.parse().expect("infallible"),
                        prompt: node.prompt.clone(),
                    },
                );
            }
        }
        Ok(out)
    }

    async fn clear_all(&self) -> Result<()> {
        self.nodes.clear();
        self.edges.clear();
        self.chunks.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let mentions: usize = self.chunks.iter().map(|c| c.value().mentions.len()).sum();
        Ok(GraphStats {
            total_nodes: (self.nodes.len() + self.chunks.len()) as u64,
            total_relationships: (self.edges.len() + mentions + self.chunks.len() * 2) as u64,
        })
    }
}
