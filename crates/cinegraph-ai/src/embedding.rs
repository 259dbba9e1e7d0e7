use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use cinegraph_core::{CinegraphError, EmbeddingConfig, Result, EMBEDDING_DIM};

/// text -> fixed-dimension vector. Determinism across calls is not
/// required; the pipeline tolerates drift.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;

    fn provider_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embedding backend speaking the common `/embeddings` shape, with
/// retry, bounded concurrency and an LRU cache over text hashes.
pub struct HttpEmbeddingProvider {
    config: EmbeddingConfig,
    client: Client,
    semaphore: Arc<Semaphore>,
    cache: Mutex<LruCache<u64, Arc<Vec<f32>>>>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.dimension != EMBEDDING_DIM {
            return Err(CinegraphError::Configuration(format!(
                "embedding dimension {} does not match the required {}",
                config.dimension, EMBEDDING_DIM
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("cinegraph/0.3")
            .build()
            .map_err(|e| CinegraphError::Network(e.to_string()))?;
        let cache_cap = NonZeroUsize::new(config.cache_entries.max(1)).expect("non-zero");
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            cache: Mutex::new(LruCache::new(cache_cap)),
            config,
            client,
        })
    }

    fn cache_key(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    async fn call_api(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts,
        };

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt as u32));
                tokio::time::sleep(delay).await;
            }

            let api_url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
            let mut builder = self.client.post(&api_url).json(&request);
            if let Some(key) = &self.config.api_key {
                builder = builder.header(
                    "Authorization",
                    format!("Bearer {}", key.expose_secret()),
                );
            }

            let result = timeout(Duration::from_secs(self.config.timeout_secs), builder.send()).await;
            match result {
                Ok(Ok(response)) if response.status().is_success() => {
                    match response.json::<EmbeddingResponse>().await {
                        Ok(parsed) => {
                            let mut data = parsed.data;
                            data.sort_by_key(|item| item.index);
                            let vectors: Vec<Vec<f32>> =
                                data.into_iter().map(|item| item.embedding).collect();
                            for vector in &vectors {
                                if vector.len() != self.config.dimension {
                                    return Err(CinegraphError::Embedding(format!(
                                        "backend returned {} dims, expected {}",
                                        vector.len(),
                                        self.config.dimension
                                    )));
                                }
                            }
                            return Ok(vectors);
                        }
                        Err(e) => {
                            last_error = Some(CinegraphError::Embedding(format!(
                                "unparseable embedding response: {}",
                                e
                            )));
                        }
                    }
                }
                Ok(Ok(response)) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    last_error = Some(CinegraphError::Embedding(format!(
                        "embedding API error (HTTP {}): {}",
                        status,
                        body.chars().take(200).collect::<String>()
                    )));
                }
                Ok(Err(e)) => {
                    last_error = Some(CinegraphError::Network(format!("request failed: {}", e)));
                }
                Err(_) => {
                    last_error = Some(CinegraphError::Timeout(
                        "embedding request timed out".to_string(),
                    ));
                }
            }

            if attempt < self.config.max_retries {
                warn!(
                    "embedding call failed (attempt {}/{}), retrying...",
                    attempt + 1,
                    self.config.max_retries + 1
                );
            }
        }

        Err(last_error
            .unwrap_or_else(|| CinegraphError::Embedding("all retry attempts failed".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::cache_key(text);
        if let Some(cached) = self.cache.lock().await.get(&key) {
            debug!("embedding cache hit");
            return Ok(cached.as_ref().clone());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CinegraphError::Embedding("semaphore closed".to_string()))?;
        let mut vectors = self.call_api(vec![text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| CinegraphError::Embedding("backend returned no vector".to_string()))?;

        self.cache.lock().await.put(key, Arc::new(vector.clone()));
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}

/// Deterministic hash-seeded embedder for offline runs and tests: similar
/// only to identical text, unit-normalized, always `EMBEDDING_DIM` wide.
#[derive(Debug, Default, Clone)]
pub struct HashEmbedding;

impl HashEmbedding {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        let mut vector = Vec::with_capacity(EMBEDDING_DIM);
        for _ in 0..EMBEDDING_DIM {
            // xorshift64 keeps this dependency-free and reproducible
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32);
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[tokio::test]
    async fn hash_embedding_is_deterministic_and_normalized() {
        let embedder = HashEmbedding::new();
        let a = embedder.embed_text("암살에서 안옥윤").await.unwrap();
        let b = embedder.embed_text("암살에서 안옥윤").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
    }

    #[tokio::test]
    async fn different_texts_produce_different_vectors() {
        let embedder = HashEmbedding::new();
        let a = embedder.embed_text("first").await.unwrap();
        let b = embedder.embed_text("second").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn http_provider_rejects_wrong_dimension_up_front() {
        let config = EmbeddingConfig {
            dimension: 768,
            ..EmbeddingConfig::default()
        };
        assert!(HttpEmbeddingProvider::new(config).is_err());
    }
}
