use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cinegraph_core::{
    ChunkDoc, ChunkHit, CinegraphError, EntityDoc, EntityLabel, IndexKind, Result, SearchConfig,
    SearchIndex, EMBEDDING_DIM,
};

use crate::mappings::{chunk_index_body, entity_index_body};

/// OpenSearch adapter: keyword/analyzed lookups over the entity directory
/// and KNN retrieval over the chunk index.
pub struct OpenSearchIndex {
    config: SearchConfig,
    client: Client,
}

impl OpenSearchIndex {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("cinegraph/0.3")
            .build()
            .map_err(|e| CinegraphError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn index_name(&self, index: IndexKind) -> &str {
        match index {
            IndexKind::Entities => &self.config.entity_index,
            IndexKind::Chunks => &self.config.chunk_index,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, url);
        if let Some(username) = &self.config.username {
            let password = self
                .config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string());
            builder = builder.basic_auth(username, password);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = builder
            .send()
            .await
            .map_err(|e| CinegraphError::Network(format!("index request failed: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CinegraphError::Network(format!("failed to read index response: {}", e)))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, body))
    }

    async fn search(&self, index: IndexKind, body: Value) -> Result<Vec<Value>> {
        let path = format!("{}/_search", self.index_name(index));
        let (status, response) = self.send(self.request(Method::POST, &path).json(&body)).await?;
        if !status.is_success() {
            return Err(CinegraphError::Index(format!(
                "search failed (HTTP {}): {}",
                status, response
            )));
        }
        Ok(response["hits"]["hits"].as_array().cloned().unwrap_or_default())
    }

    /// First hit's `entity.name`, if any.
    async fn first_entity_name(&self, body: Value) -> Result<Option<String>> {
        let hits = self.search(IndexKind::Entities, body).await?;
        Ok(hits.first().and_then(|hit| {
            hit["_source"]["entity"]["name"]
                .as_str()
                .map(|s| s.trim().to_string())
        }))
    }

    fn parse_entity_hit(hit: &Value) -> Option<(String, EntityDoc)> {
        let doc_id = hit["_id"].as_str()?.to_string();
        let doc: EntityDoc = serde_json::from_value(hit["_source"]["entity"].clone()).ok()?;
        Some((doc_id, doc))
    }
}

#[async_trait]
impl SearchIndex for OpenSearchIndex {
    async fn ensure_indices(&self) -> Result<()> {
        for (kind, body) in [
            (IndexKind::Entities, entity_index_body()),
            (IndexKind::Chunks, chunk_index_body()),
        ] {
            let name = self.index_name(kind);
            let (status, _) = self.send(self.request(Method::HEAD, name)).await?;
            if status == StatusCode::NOT_FOUND {
                info!("creating index '{}'", name);
                let (status, response) =
                    self.send(self.request(Method::PUT, name).json(&body)).await?;
                if !status.is_success() {
                    return Err(CinegraphError::Index(format!(
                        "failed to create index '{}' (HTTP {}): {}",
                        name, status, response
                    )));
                }
            }
            self.validate_mapping(kind).await?;
        }
        Ok(())
    }

    async fn validate_mapping(&self, index: IndexKind) -> Result<()> {
        let name = self.index_name(index);
        let (status, body) = self
            .send(self.request(Method::GET, &format!("{}/_mapping", name)))
            .await?;
        if !status.is_success() {
            return Err(CinegraphError::Configuration(format!(
                "index '{}' does not exist or its mapping is unreadable (HTTP {})",
                name, status
            )));
        }

        let (root, vec_field) = match index {
            IndexKind::Entities => ("entity", "summary_vec"),
            IndexKind::Chunks => ("chunk", "context_vec"),
        };
        let field = &body[name]["mappings"]["properties"][root]["properties"][vec_field];
        let vec_type = field["type"].as_str().unwrap_or_default();
        let dimension = field["dimension"].as_u64().unwrap_or(0) as usize;

        if vec_type != "knn_vector" {
            return Err(CinegraphError::Configuration(format!(
                "index '{}': field {}.{} has type '{}', expected knn_vector",
                name, root, vec_field, vec_type
            )));
        }
        if dimension != EMBEDDING_DIM {
            return Err(CinegraphError::Configuration(format!(
                "index '{}': field {}.{} has dimension {}, expected {}",
                name, root, vec_field, dimension, EMBEDDING_DIM
            )));
        }
        debug!("index '{}' mapping validated ({} dims)", name, dimension);
        Ok(())
    }

    async fn delete_index(&self, index: IndexKind) -> Result<()> {
        let name = self.index_name(index);
        let (status, response) = self.send(self.request(Method::DELETE, name)).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            info!("deleted index '{}'", name);
            Ok(())
        } else {
            Err(CinegraphError::Index(format!(
                "failed to delete index '{}' (HTTP {}): {}",
                name, status, response
            )))
        }
    }

    async fn refresh(&self, index: IndexKind) -> Result<()> {
        let path = format!("{}/_refresh", self.index_name(index));
        let (status, _) = self.send(self.request(Method::POST, &path)).await?;
        if !status.is_success() {
            warn!("index refresh failed with HTTP {}", status);
        }
        Ok(())
    }

    async fn count(&self, index: IndexKind) -> Result<usize> {
        let path = format!("{}/_count", self.index_name(index));
        let (status, body) = self.send(self.request(Method::GET, &path)).await?;
        if !status.is_success() {
            return Err(CinegraphError::Index(format!(
                "count failed (HTTP {})",
                status
            )));
        }
        Ok(body["count"].as_u64().unwrap_or(0) as usize)
    }

    async fn search_name_exact(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        {
                            "bool": {
                                "should": [
                                    { "term": { "entity.name.keyword": { "value": name, "boost": 3.0 } } },
                                    { "match": { "entity.name": { "query": name, "operator": "and", "boost": 2.0 } } }
                                ]
                            }
                        },
                        { "term": { "entity.entity_type": entity_type.as_str() } }
                    ]
                }
            },
            "size": 1,
            "min_score": self.config.min_score,
            "_source": ["entity.name"]
        });
        self.first_entity_name(body).await
    }

    async fn search_synonym_exact(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "entity.entity_type": entity_type.as_str() } },
                        { "match": { "entity.synonym.text": name } }
                    ]
                }
            },
            "size": 1,
            "_source": { "excludes": ["entity.summary", "entity.summary_vec"] }
        });
        self.first_entity_name(body).await
    }

    async fn search_synonym_partial(
        &self,
        name: &str,
        entity_type: &EntityLabel,
    ) -> Result<Option<String>> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "entity.entity_type": entity_type.as_str() } },
                        { "wildcard": { "entity.synonym": { "value": format!("*{}*", name) } } }
                    ]
                }
            },
            "size": 1,
            "_source": { "excludes": ["entity.summary", "entity.summary_vec"] }
        });
        self.first_entity_name(body).await
    }

    async fn find_entity_doc(
        &self,
        name: &str,
        entity_type: Option<&EntityLabel>,
    ) -> Result<Option<(String, EntityDoc)>> {
        let mut must = vec![json!({ "term": { "entity.name.keyword": name } })];
        if let Some(entity_type) = entity_type {
            must.push(json!({ "term": { "entity.entity_type": entity_type.as_str() } }));
        }
        let body = json!({
            "query": { "bool": { "must": must } },
            "size": 1
        });
        let hits = self.search(IndexKind::Entities, body).await?;
        Ok(hits.first().and_then(Self::parse_entity_hit))
    }

    async fn get_entity_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<(String, EntityDoc)>> {
        let path = format!("{}/_doc/{}", self.config.entity_index, canonical_id);
        let (status, body) = self.send(self.request(Method::GET, &path)).await?;
        if status == StatusCode::NOT_FOUND {
            // older imports keyed documents differently; fall back to a term query
            let body = json!({
                "query": { "term": { "entity.canonical_id": canonical_id } },
                "size": 1
            });
            let hits = self.search(IndexKind::Entities, body).await?;
            return Ok(hits.first().and_then(Self::parse_entity_hit));
        }
        if !status.is_success() {
            return Err(CinegraphError::Index(format!(
                "doc lookup failed (HTTP {})",
                status
            )));
        }
        let doc_id = body["_id"].as_str().unwrap_or(canonical_id).to_string();
        let doc: Option<EntityDoc> = serde_json::from_value(body["_source"]["entity"].clone()).ok();
        Ok(doc.map(|d| (doc_id, d)))
    }

    async fn put_entity(&self, doc_id: &str, doc: &EntityDoc) -> Result<()> {
        if !doc.summary_vec.is_empty() && doc.summary_vec.len() != EMBEDDING_DIM {
            return Err(CinegraphError::Configuration(format!(
                "summary_vec has {} dims, expected {}",
                doc.summary_vec.len(),
                EMBEDDING_DIM
            )));
        }
        let path = format!("{}/_doc/{}", self.config.entity_index, doc_id);
        let (status, response) = self
            .send(self.request(Method::PUT, &path).json(&json!({ "entity": doc })))
            .await?;
        if !status.is_success() {
            return Err(CinegraphError::Index(format!(
                "entity index write failed (HTTP {}): {}",
                status, response
            )));
        }
        Ok(())
    }

    async fn update_synonyms(&self, doc_id: &str, synonyms: &[String]) -> Result<()> {
        let path = format!("{}/_update/{}", self.config.entity_index, doc_id);
        let body = json!({ "doc": { "entity": { "synonym": synonyms } } });
        let (status, response) = self.send(self.request(Method::POST, &path).json(&body)).await?;
        if !status.is_success() {
            return Err(CinegraphError::Index(format!(
                "synonym update failed (HTTP {}): {}",
                status, response
            )));
        }
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
        let path = format!("{}/_doc/{}", self.config.chunk_index, doc_id);
        let (status, response) = self
            .send(self.request(Method::PUT, &path).json(&json!({ "chunk": doc })))
            .await?;
        if !status.is_success() {
            return Err(CinegraphError::Index(format!(
                "chunk index write failed (HTTP {}): {}",
                status, response
            )));
        }
        Ok(())
    }

    async fn knn_chunks(&self, vector: &[f32], k: usize) -> Result<Vec<ChunkHit>> {
        let body = json!({
            "size": k,
            "query": {
                "knn": {
                    "chunk.context_vec": {
                        "vector": vector,
                        "k": k
                    }
                }
            },
            "_source": ["chunk.context", "chunk.canonical_id"]
        });
        let hits = self.search(IndexKind::Chunks, body).await?;
        Ok(hits
            .iter()
            .filter_map(|hit| {
                Some(ChunkHit {
                    doc_id: hit["_id"].as_str()?.to_string(),
                    canonical_id: hit["_source"]["chunk"]["canonical_id"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    context: hit["_source"]["chunk"]["context"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    score: hit["_score"].as_f64().unwrap_or(0.0) as f32,
                })
            })
            .collect())
    }
}
