use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::EMBEDDING_DIM;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// openCypher HTTPS endpoint, e.g. "https://my-cluster:8182/openCypher"
    pub endpoint: String,
    #[serde(default = "GraphConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GraphConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost:8182/openCypher".into(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
    #[serde(default = "SearchConfig::default_entity_index")]
    pub entity_index: String,
    #[serde(default = "SearchConfig::default_chunk_index")]
    pub chunk_index: String,
    /// Minimum lexical relevance for a name_exact hit.
    #[serde(default = "SearchConfig::default_min_score")]
    pub min_score: f32,
    /// Opt-in third lookup rung over synonym substrings.
    #[serde(default)]
    pub enable_synonym_partial: bool,
    #[serde(default = "SearchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SearchConfig {
    fn default_entity_index() -> String {
        "entities".to_string()
    }

    fn default_chunk_index() -> String {
        "chunks".to_string()
    }

    fn default_min_score() -> f32 {
        3.4
    }

    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost:9200".into(),
            username: None,
            password: None,
            entity_index: Self::default_entity_index(),
            chunk_index: Self::default_chunk_index(),
            min_score: Self::default_min_score(),
            enable_synonym_partial: false,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,
    #[serde(default = "EmbeddingConfig::default_dimension")]
    pub dimension: usize,
    #[serde(default = "EmbeddingConfig::default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "EmbeddingConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "EmbeddingConfig::default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "EmbeddingConfig::default_cache_entries")]
    pub cache_entries: usize,
}

impl EmbeddingConfig {
    fn default_model() -> String {
        "titan-embed-text-v2".to_string()
    }

    fn default_dimension() -> usize {
        EMBEDDING_DIM
    }

    fn default_max_retries() -> usize {
        3
    }

    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_max_concurrent() -> usize {
        10
    }

    fn default_cache_entries() -> usize {
        10_000
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("CINEGRAPH_EMBEDDING_API_BASE")
                .unwrap_or_else(|_| "https://localhost:8400/v1".into()),
            api_key: env::var("CINEGRAPH_EMBEDDING_API_KEY")
                .ok()
                .map(SecretString::new),
            model: Self::default_model(),
            dimension: Self::default_dimension(),
            max_retries: Self::default_max_retries(),
            timeout_secs: Self::default_timeout_secs(),
            max_concurrent: Self::default_max_concurrent(),
            cache_entries: Self::default_cache_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default = "LlmConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "LlmConfig::default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "LlmConfig::default_max_retries")]
    pub max_retries: u32,
}

impl LlmConfig {
    fn default_model() -> String {
        "claude-3-5-sonnet-20241022".to_string()
    }

    fn default_temperature() -> f32 {
        0.1
    }

    fn default_max_tokens() -> usize {
        4096
    }

    fn default_timeout_secs() -> u64 {
        120
    }

    fn default_max_retries() -> u32 {
        3
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("ANTHROPIC_API_KEY").ok().map(SecretString::new),
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "WebSearchConfig::default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default = "WebSearchConfig::default_max_results")]
    pub max_results: usize,
    #[serde(default = "WebSearchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl WebSearchConfig {
    fn default_api_base() -> String {
        "https://api.tavily.com".to_string()
    }

    fn default_max_results() -> usize {
        5
    }

    fn default_timeout_secs() -> u64 {
        20
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            api_key: env::var("TAVILY_API_KEY").ok().map(SecretString::new),
            max_results: Self::default_max_results(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "PipelineConfig::default_catalog_dir")]
    pub catalog_dir: PathBuf,
    #[serde(default = "PipelineConfig::default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "PipelineConfig::default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Phase-1 workers (node writes).
    #[serde(default = "PipelineConfig::default_node_workers")]
    pub node_workers: usize,
    /// Phase-2 workers (edge writes collide heavily; keep this low).
    #[serde(default = "PipelineConfig::default_edge_workers")]
    pub edge_workers: usize,
    #[serde(default = "PipelineConfig::default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "PipelineConfig::default_drain_rounds")]
    pub drain_rounds: usize,
    #[serde(default = "PipelineConfig::default_publish_workers")]
    pub publish_workers: usize,
}

impl PipelineConfig {
    fn default_artifact_dir() -> PathBuf {
        PathBuf::from("step/chunkings")
    }

    fn default_catalog_dir() -> PathBuf {
        PathBuf::from("data/movie_cast")
    }

    fn default_chunk_size() -> usize {
        1500
    }

    fn default_chunk_overlap() -> usize {
        100
    }

    fn default_node_workers() -> usize {
        20
    }

    fn default_edge_workers() -> usize {
        1
    }

    fn default_max_attempts() -> usize {
        5
    }

    fn default_drain_rounds() -> usize {
        5
    }

    fn default_publish_workers() -> usize {
        10
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: Self::default_artifact_dir(),
            catalog_dir: Self::default_catalog_dir(),
            chunk_size: Self::default_chunk_size(),
            chunk_overlap: Self::default_chunk_overlap(),
            node_workers: Self::default_node_workers(),
            edge_workers: Self::default_edge_workers(),
            max_attempts: Self::default_max_attempts(),
            drain_rounds: Self::default_drain_rounds(),
            publish_workers: Self::default_publish_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "QueryConfig::default_top_k")]
    pub top_k: usize,
    #[serde(default = "QueryConfig::default_neighbor_hops")]
    pub neighbor_hops: usize,
    #[serde(default = "QueryConfig::default_agent_pool")]
    pub agent_pool: usize,
    #[serde(default = "QueryConfig::default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "QueryConfig::default_max_agent_rounds")]
    pub max_agent_rounds: usize,
}

impl QueryConfig {
    fn default_top_k() -> usize {
        5
    }

    fn default_neighbor_hops() -> usize {
        1
    }

    fn default_agent_pool() -> usize {
        5
    }

    fn default_deadline_secs() -> u64 {
        120
    }

    fn default_max_agent_rounds() -> usize {
        4
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: Self::default_top_k(),
            neighbor_hops: Self::default_neighbor_hops(),
            agent_pool: Self::default_agent_pool(),
            deadline_secs: Self::default_deadline_secs(),
            max_agent_rounds: Self::default_max_agent_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub websearch: WebSearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            graph: GraphConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            websearch: WebSearchConfig::default(),
            pipeline: PipelineConfig::default(),
            query: QueryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.graph.endpoint.trim().is_empty(),
            "graph.endpoint cannot be empty"
        );
        anyhow::ensure!(
            !self.search.endpoint.trim().is_empty(),
            "search.endpoint cannot be empty"
        );
        anyhow::ensure!(
            self.embedding.dimension == EMBEDDING_DIM,
            "embedding.dimension must be {} (got {})",
            EMBEDDING_DIM,
            self.embedding.dimension
        );
        anyhow::ensure!(
            self.pipeline.chunk_overlap < self.pipeline.chunk_size,
            "pipeline.chunk_overlap must be smaller than pipeline.chunk_size"
        );
        anyhow::ensure!(
            self.pipeline.node_workers > 0 && self.pipeline.edge_workers > 0,
            "pipeline worker counts must be > 0"
        );
        anyhow::ensure!(self.query.top_k > 0, "query.top_k must be > 0");
        Ok(())
    }

    /// Layered load: default.toml, {env}.toml, local.toml, then
    /// CINEGRAPH__* environment overrides.
    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("CINEGRAPH").separator("__"));

        let settings: Settings = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }

    pub fn load(env_override: Option<String>) -> Result<Settings> {
        let env_name = env_override.unwrap_or_else(Self::default_env);
        let config_dir = Self::default_config_dir();
        let settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.validate()?;
        Ok(settings)
    }

    /// ~/.cinegraph when it exists, ./config as the project-level fallback,
    /// then the current directory.
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let user_dir = home_dir.join(".cinegraph");
            if user_dir.exists() {
                info!("Using config directory: {:?}", user_dir);
                return user_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        cwd
    }
}
