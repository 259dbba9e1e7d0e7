use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio::time::timeout;
use tracing::{debug, warn};

use cinegraph_core::{
    ids, CanonicalIdAssignment, ChunkNode, CinegraphError, EdgeSummaryCandidate, EntityLabel,
    EntityPromptInfo, EntityUpsert, GraphConfig, GraphStats, GraphStore, MentionedEntity,
    NeighborRow, NodeSummaryCandidate, Result, Strength, SummarizedEntity, CHUNK_LABEL,
};

use crate::accumulate::{
    encode_descriptions, merge_descriptions, order_pair, parse_description_field,
};

/// openCypher-over-HTTPS adapter for an Amazon Neptune style endpoint.
/// Every method is a small number of parametrized statements; dynamic labels
/// are validated against a closed identifier alphabet before substitution.
pub struct NeptuneGraph {
    config: GraphConfig,
    client: Client,
}

impl NeptuneGraph {
    pub fn new(config: GraphConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("cinegraph/0.3")
            .build()
            .map_err(|e| CinegraphError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// POST one openCypher statement with parameters and return the result
    /// rows. Store-side concurrency rejections surface as conflict errors so
    /// the writer can retry them.
    pub async fn execute(&self, query: &str, parameters: Value) -> Result<Vec<Map<String, Value>>> {
        let body = json!({
            "query": query,
            "parameters": parameters,
        });

        debug!(target: "cinegraph_graph::neptune", "openCypher: {}", query.trim());

        let request = self.client.post(&self.config.endpoint).json(&body).send();
        let response = timeout(Duration::from_secs(self.config.timeout_secs), request)
            .await
            .map_err(|_| CinegraphError::Timeout("openCypher request timed out".to_string()))?
            .map_err(|e| CinegraphError::Network(format!("openCypher request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CinegraphError::Network(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            if text.contains("ConcurrentModification") {
                return Err(CinegraphError::Conflict(format!(
                    "openCypher rejected write (HTTP {}): {}",
                    status,
                    text.chars().take(300).collect::<String>()
                )));
            }
            return Err(CinegraphError::Graph(format!(
                "openCypher error (HTTP {}): {}",
                status,
                text.chars().take(300).collect::<String>()
            )));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| CinegraphError::Graph(format!("unparseable openCypher response: {}", e)))?;

        let rows = parsed
            .get("results")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.as_object().cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn checked_label<'a>(&self, label: &'a EntityLabel) -> Result<&'a str> {
        if !label.is_valid_identifier() {
            return Err(CinegraphError::Graph(format!(
                "refusing to substitute label {:?} into a statement",
                label.as_str()
            )));
        }
        Ok(label.as_str())
    }
}

fn row_str(row: &Map<String, Value>, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn row_descriptions(row: &Map<String, Value>, key: &str) -> Vec<String> {
    row.get(key)
        .map(parse_description_field)
        .unwrap_or_default()
}

/// `labels(n)` returns an array; the first non-reserved label is the
/// domain label.
fn row_label(row: &Map<String, Value>, key: &str) -> EntityLabel {
    let raw = match row.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .find(|l| !l.starts_with("__"))
            .or_else(|| items.first().and_then(Value::as_str))
            .unwrap_or("UNKNOWN"),
        Some(Value::String(s)) => s.as_str(),
        _ => "UNKNOWN",
    };
    raw.parse().expect("infallible")
}

#[async_trait]
impl GraphStore for NeptuneGraph {
    async fn upsert_base_provenance(
        &self,
        movie_id: &str,
        reviewer_id: &str,
        chunk_id: &str,
        chunk_text: &str,
    ) -> Result<()> {
        let query = format!(
            "MERGE (r:REVIEWER {{id: $reviewer_id}}) \
             ON CREATE SET r.canonical_id = $reviewer_cid, r.name = $reviewer_id \
             MERGE (m:MOVIE {{id: $movie_id}}) \
             ON CREATE SET m.canonical_id = $movie_cid, m.name = $movie_id \
             MERGE (m)-[:HAS_CHUNK]->(c:{chunk} {{id: $chunk_id}}) \
             ON CREATE SET c.canonical_id = $chunk_cid \
             SET c.text = $text \
             MERGE (c)-[:WRITTEN_BY]->(r)",
            chunk = CHUNK_LABEL
        );
        self.execute(
            &query,
            json!({
                "movie_id": movie_id,
                "reviewer_id": reviewer_id,
                "chunk_id": chunk_id,
                "text": chunk_text,
                "reviewer_cid": ids::canonical_id(reviewer_id, &EntityLabel::Reviewer),
                "movie_cid": ids::canonical_id(movie_id, &EntityLabel::Movie),
                "chunk_cid": format!("{}_{}", CHUNK_LABEL, chunk_id),
            }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_entity_with_accumulated_description(
        &self,
        label: &EntityLabel,
        name: &str,
        new_descriptions: &[String],
    ) -> Result<EntityUpsert> {
        let label_str = self.checked_label(label)?;

        let find = format!(
            "MATCH (n:{label_str} {{name: $name}}) \
             RETURN n.description AS description, n.canonical_id AS canonical_id"
        );
        let existing = self.execute(&find, json!({ "name": name })).await?;

        let was_existing = !existing.is_empty();
        let mut existing_descriptions = Vec::new();
        let mut canonical_id = None;
        for row in &existing {
            existing_descriptions.extend(row_descriptions(row, "description"));
            if canonical_id.is_none() {
                canonical_id = row_str(row, "canonical_id");
            }
        }

        let merged = merge_descriptions(&existing_descriptions, new_descriptions);
        let canonical_id = canonical_id.unwrap_or_else(|| ids::canonical_id(name, label));

        let upsert = format!(
            "MERGE (n:{label_str} {{name: $name}}) \
             SET n.description = $descriptions, n.canonical_id = $canonical_id"
        );
        self.execute(
            &upsert,
            json!({
                "name": name,
                "descriptions": encode_descriptions(&merged),
                "canonical_id": canonical_id,
            }),
        )
        .await?;

        Ok(EntityUpsert {
            canonical_id,
            was_existing,
        })
    }

    async fn upsert_mentions_edge(
        &self,
        chunk_id: &str,
        entity_name: &str,
        entity_label: &EntityLabel,
    ) -> Result<()> {
        let label_str = self.checked_label(entity_label)?;
        let query = format!(
            "MATCH (c:{chunk} {{id: $chunk_id}}) \
             MATCH (n:{label_str} {{name: $name}}) \
             MERGE (n)<-[:MENTIONS]-(c)",
            chunk = CHUNK_LABEL
        );
        self.execute(&query, json!({ "chunk_id": chunk_id, "name": entity_name }))
            .await?;
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
        let (first, first_label, second, second_label) =
            order_pair(name_a, label_a, name_b, label_b);
        let first_label_str = self.checked_label(first_label)?.to_string();
        let second_label_str = self.checked_label(second_label)?.to_string();

        let find = "MATCH (a)-[r:RELATIONSHIP]-(b) \
                    WHERE (a.name = $e1 AND b.name = $e2) OR (a.name = $e2 AND b.name = $e1) \
                    RETURN r.description AS description, r.strength AS strength";
        let existing = self
            .execute(find, json!({ "e1": first, "e2": second }))
            .await?;

        let was_existing = !existing.is_empty();
        let mut existing_descriptions = Vec::new();
        let mut max_strength = strength.as_f64();
        for row in &existing {
            existing_descriptions.extend(row_descriptions(row, "description"));
            if let Some(s) = row.get("strength").and_then(Value::as_f64) {
                max_strength = max_strength.max(s);
            }
        }
        let merged = merge_descriptions(&existing_descriptions, new_descriptions);

        // Replace-with-merge: the store has no edge-level MERGE that can
        // also collapse duplicates, so delete every edge between the pair
        // and recreate exactly one.
        let delete = "MATCH (a)-[r:RELATIONSHIP]-(b) \
                      WHERE (a.name = $e1 AND b.name = $e2) OR (a.name = $e2 AND b.name = $e1) \
                      DELETE r";
        self.execute(delete, json!({ "e1": first, "e2": second }))
            .await?;

        let create = format!(
            "MATCH (s:{first_label_str} {{name: $e1}}) \
             MATCH (t:{second_label_str} {{name: $e2}}) \
             CREATE (s)-[r:RELATIONSHIP {{description: $descriptions, strength: $strength}}]->(t) \
             RETURN count(r) AS created"
        );
        let rows = self
            .execute(
                &create,
                json!({
                    "e1": first,
                    "e2": second,
                    "descriptions": encode_descriptions(&merged),
                    "strength": max_strength,
                }),
            )
            .await?;

        let created = rows
            .first()
            .and_then(|r| r.get("created"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if created == 0 {
            return Err(CinegraphError::Graph(format!(
                "relationship endpoints missing: {} ({}) / {} ({})",
                first, first_label_str, second, second_label_str
            )));
        }

        Ok(was_existing)
    }

    async fn node_summary_candidates(&self) -> Result<Vec<NodeSummaryCandidate>> {
        let query = format!(
            "MATCH (n) \
             WHERE n.name IS NOT NULL AND n.description IS NOT NULL AND n.summary IS NULL \
               AND NOT n:{chunk} AND NOT n:MOVIE AND NOT n:REVIEWER \
             RETURN n.name AS name, labels(n) AS labels, n.description AS description \
             ORDER BY n.name",
            chunk = CHUNK_LABEL
        );
        let rows = self.execute(&query, json!({})).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row_str(row, "name")?;
                Some(NodeSummaryCandidate {
                    name,
                    label: row_label(row, "labels"),
                    descriptions: row_descriptions(row, "description"),
                })
            })
            .collect())
    }

    async fn edge_summary_candidates(&self) -> Result<Vec<EdgeSummaryCandidate>> {
        let query = "MATCH (s)-[r:RELATIONSHIP]-(t) \
                     WHERE id(s) < id(t) AND r.description IS NOT NULL AND r.summary IS NULL \
                     RETURN s.name AS source, t.name AS target, r.description AS description";
        let rows = self.execute(query, json!({})).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(EdgeSummaryCandidate {
                    source_name: row_str(row, "source")?,
                    target_name: row_str(row, "target")?,
                    descriptions: row_descriptions(row, "description"),
                })
            })
            .collect())
    }

    async fn write_node_summary(
        &self,
        label: &EntityLabel,
        name: &str,
        summary: &str,
    ) -> Result<()> {
        let label_str = self.checked_label(label)?;
        let query = format!(
            "MATCH (n:{label_str}) WHERE n.name = $name SET n.summary = $summary"
        );
        self.execute(&query, json!({ "name": name, "summary": summary }))
            .await?;
        Ok(())
    }

    async fn write_edge_summary(&self, name_a: &str, name_b: &str, summary: &str) -> Result<()> {
        let query = "MATCH (a)-[r:RELATIONSHIP]-(b) \
                     WHERE (a.name = $e1 AND b.name = $e2) OR (a.name = $e2 AND b.name = $e1) \
                     SET r.summary = $summary";
        self.execute(
            query,
            json!({ "e1": name_a, "e2": name_b, "summary": summary }),
        )
        .await?;
        Ok(())
    }

    async fn assign_canonical_id(
        &self,
        label: &EntityLabel,
        name: &str,
    ) -> Result<CanonicalIdAssignment> {
        let label_str = self.checked_label(label)?;

        let check = format!(
            "MATCH (n:{label_str} {{name: $name}}) RETURN n.canonical_id AS canonical_id"
        );
        let rows = self.execute(&check, json!({ "name": name })).await?;
        if let Some(existing) = rows.first().and_then(|r| row_str(r, "canonical_id")) {
            return Ok(CanonicalIdAssignment {
                canonical_id: existing,
                created_new: false,
            });
        }

        let canonical_id = ids::canonical_id(name, label);
        let update = format!(
            "MATCH (n:{label_str} {{name: $name}}) SET n.canonical_id = $canonical_id"
        );
        self.execute(&update, json!({ "name": name, "canonical_id": canonical_id }))
            .await?;
        Ok(CanonicalIdAssignment {
            canonical_id,
            created_new: true,
        })
    }

    async fn summarized_entities(&self) -> Result<Vec<SummarizedEntity>> {
        let query = format!(
            "MATCH (n) \
             WHERE n.name IS NOT NULL AND n.summary IS NOT NULL AND n.canonical_id IS NOT NULL \
               AND NOT n:{chunk} AND NOT n:MOVIE AND NOT n:REVIEWER \
             RETURN n.name AS name, labels(n) AS labels, n.summary AS summary, \
                    n.canonical_id AS canonical_id \
             ORDER BY n.name",
            chunk = CHUNK_LABEL
        );
        let rows = self.execute(&query, json!({})).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(SummarizedEntity {
                    name: row_str(row, "name")?,
                    label: row_label(row, "labels"),
                    summary: row_str(row, "summary")?,
                    canonical_id: row_str(row, "canonical_id")?,
                })
            })
            .collect())
    }

    async fn all_chunks(&self) -> Result<Vec<ChunkNode>> {
        let query = format!(
            "MATCH (c:{chunk}) RETURN c.id AS id, c.text AS text",
            chunk = CHUNK_LABEL
        );
        let rows = self.execute(&query, json!({})).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(ChunkNode {
                    id: row_str(row, "id")?,
                    text: row_str(row, "text").unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn chunk_mentions(&self, chunk_id: &str) -> Result<Vec<MentionedEntity>> {
        let query = format!(
            "MATCH (c:{chunk} {{id: $chunk_id}})-[:MENTIONS]->(e) \
             RETURN e.name AS name, labels(e) AS labels, e.description AS description, \
                    e.canonical_id AS canonical_id",
            chunk = CHUNK_LABEL
        );
        let rows = self.execute(&query, json!({ "chunk_id": chunk_id })).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(MentionedEntity {
                    name: row_str(row, "name")?,
                    label: row_label(row, "labels"),
                    description: row_descriptions(row, "description"),
                    canonical_id: row_str(row, "canonical_id"),
                })
            })
            .collect())
    }

    async fn one_hop(&self, entity_name: &str) -> Result<Vec<NeighborRow>> {
        let query = format!(
            "MATCH (e {{name: $name}})-[r:RELATIONSHIP]-(related) \
             WHERE NOT related:{chunk} AND NOT related:REVIEWER \
             RETURN e.name AS source, type(r) AS relationship, related.name AS target, \
                    labels(related) AS target_labels, related.description AS target_description, \
                    r.description AS rel_description",
            chunk = CHUNK_LABEL
        );
        let rows = self.execute(&query, json!({ "name": entity_name })).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(NeighborRow {
                    source: row_str(row, "source")?,
                    relationship: row_str(row, "relationship")
                        .unwrap_or_else(|| "RELATIONSHIP".to_string()),
                    target: row_str(row, "target")?,
                    target_label: row_label(row, "target_labels"),
                    target_description: row_descriptions(row, "target_description"),
                    rel_description: row_descriptions(row, "rel_description"),
                })
            })
            .collect())
    }

    async fn entity_prompts(&self, names: &[String]) -> Result<HashMap<String, EntityPromptInfo>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let query = "MATCH (e) WHERE e.name IN $names \
                     RETURN e.name AS name, labels(e) AS labels, e.prompt AS prompt";
        let rows = self.execute(query, json!({ "names": names })).await?;
        let mut out = HashMap::new();
        for row in &rows {
            if let Some(name) = row_str(row, "name") {
                out.insert(
                    name,
                    EntityPromptInfo {
                        label: row_label(row, "labels"),
                        prompt: row_str(row, "prompt").filter(|p| !p.trim().is_empty()),
                    },
                );
            }
        }
        Ok(out)
    }

    async fn raw_query(&self, cypher: &str) -> Result<Vec<Map<String, Value>>> {
        self.execute(cypher, json!({})).await
    }

    async fn clear_all(&self) -> Result<()> {
        warn!("deleting every node and relationship in the graph");
        self.execute("MATCH (n) DETACH DELETE n", json!({})).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let nodes = self
            .execute("MATCH (n) RETURN count(n) AS cnt", json!({}))
            .await?;
        let edges = self
            .execute("MATCH ()-[r]->() RETURN count(r) AS cnt", json!({}))
            .await?;
        let count_of = |rows: &[Map<String, Value>]| {
            rows.first()
                .and_then(|r| r.get("cnt"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Ok(GraphStats {
            total_nodes: count_of(&nodes),
            total_relationships: count_of(&edges),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_label_skips_reserved_labels() {
        let mut row = Map::new();
        row.insert("labels".to_string(), json!(["__Chunk__", "ACTOR"]));
        assert_eq!(row_label(&row, "labels"), EntityLabel::Actor);
    }

    #[test]
    fn row_label_falls_back_to_first_entry() {
        let mut row = Map::new();
        row.insert("labels".to_string(), json!(["__Chunk__"]));
        assert_eq!(
            row_label(&row, "labels"),
            EntityLabel::Other("__Chunk__".to_string())
        );
    }

    #[test]
    fn descriptions_decode_from_stored_json_string() {
        let mut row = Map::new();
        row.insert("description".to_string(), json!("[\"spouse\"]"));
        assert_eq!(row_descriptions(&row, "description"), vec!["spouse"]);
    }
}
