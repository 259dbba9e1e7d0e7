use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cinegraph_ai::{AnthropicProvider, HttpEmbeddingProvider, WebSearchClient};
use cinegraph_core::{GraphStore, IndexKind, SearchIndex, Settings};
use cinegraph_graph::NeptuneGraph;
use cinegraph_index::{CanonicalRegistry, OpenSearchIndex};
use cinegraph_pipeline::{
    run_chunking, run_chunks_to_index, run_entity_extraction, run_entity_import,
    run_entity_resolution, run_entity_summarization, run_entity_to_index, ArtifactStore,
    CatalogSource, GraphWriter, JsonCatalog,
};
use cinegraph_query::{AgentTools, QueryRouter};

#[derive(Parser)]
#[command(name = "cinegraph", version, about = "GraphRAG pipeline for a film-review corpus")]
struct Cli {
    /// Configuration environment (default.toml + <env>.toml + local.toml)
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the entity and chunk indices with the expected mappings
    InitIndex,
    /// Recreate both indices and bulk-import per-entity catalog documents
    ImportEntities {
        /// Directory of {"entity": ...} JSON documents
        #[arg(long)]
        docs_dir: PathBuf,
    },
    /// Split review transcripts into chunk artifacts
    Chunk,
    /// Extract entities and relationships from chunk artifacts
    Extract,
    /// Resolve extracted names against the canonical registry
    Resolve,
    /// Write chunk artifacts into the graph (nodes, then edges)
    SaveToNeptune {
        /// Delete all graph data and the chunk index first
        #[arg(long)]
        clean: bool,
    },
    /// Summarize nodes and edges that accumulated descriptions
    Summarize,
    /// Publish summarized entities into the entity index
    EntityToOpensearch,
    /// Mirror graph chunks into the chunk index
    ChunksToOpensearch,
    /// Merge new surface forms into an entity's synonym set
    AddSynonym {
        name: String,
        #[arg(long, default_value = "ACTOR")]
        entity_type: String,
        #[arg(required = true)]
        synonyms: Vec<String>,
    },
    /// Answer a natural-language question over the knowledge base
    Query {
        question: String,
    },
    /// Delete every node and relationship in the graph
    Clear,
    /// Node and relationship counts
    Stats,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.env.clone()).context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let graph: Arc<dyn GraphStore> =
        Arc::new(NeptuneGraph::new(settings.graph.clone()).context("graph client")?);
    let index: Arc<dyn SearchIndex> =
        Arc::new(OpenSearchIndex::new(settings.search.clone()).context("index client")?);
    let store = ArtifactStore::new(settings.pipeline.artifact_dir.clone());
    let catalog = JsonCatalog::new(settings.pipeline.catalog_dir.clone());

    match cli.command {
        Commands::InitIndex => {
            index.ensure_indices().await?;
            info!("indices ready");
        }
        Commands::ImportEntities { docs_dir } => {
            let embedder = Arc::new(
                HttpEmbeddingProvider::new(settings.embedding.clone()).context("embedding client")?,
            );
            let counts = run_entity_import(
                index,
                embedder,
                &docs_dir,
                settings.pipeline.publish_workers,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::Chunk => {
            let reviews = catalog.load_reviews()?;
            let stats = run_chunking(
                &store,
                &reviews,
                settings.pipeline.chunk_size,
                settings.pipeline.chunk_overlap,
            )?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Extract => {
            let llm = Arc::new(AnthropicProvider::new(settings.llm.clone()).context("llm client")?);
            let stats = run_entity_extraction(&store, &catalog, llm).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Resolve => {
            let registry =
                CanonicalRegistry::new(index.clone(), settings.search.enable_synonym_partial);
            let stats = run_entity_resolution(&store, &registry).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::SaveToNeptune { clean } => {
            let before = graph.stats().await?;
            info!(
                "graph before: {} nodes, {} relationships",
                before.total_nodes, before.total_relationships
            );
            if clean {
                graph.clear_all().await?;
                index.delete_index(IndexKind::Chunks).await?;
                info!("graph and chunk index cleaned");
            }
            let chunks = store.load_all()?;
            let writer = GraphWriter::new(graph.clone(), &settings.pipeline);
            let stats = writer.run(chunks).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);

            let after = graph.stats().await?;
            info!(
                "graph after: {} nodes, {} relationships",
                after.total_nodes, after.total_relationships
            );
        }
        Commands::Summarize => {
            let llm = Arc::new(AnthropicProvider::new(settings.llm.clone()).context("llm client")?);
            let stats = run_entity_summarization(graph, llm).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::EntityToOpensearch => {
            let embedder = Arc::new(
                HttpEmbeddingProvider::new(settings.embedding.clone()).context("embedding client")?,
            );
            let stats = run_entity_to_index(graph, index, embedder).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::ChunksToOpensearch => {
            let embedder = Arc::new(
                HttpEmbeddingProvider::new(settings.embedding.clone()).context("embedding client")?,
            );
            let stats = run_chunks_to_index(
                graph,
                index,
                embedder,
                settings.pipeline.publish_workers,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::AddSynonym {
            name,
            entity_type,
            synonyms,
        } => {
            let registry =
                CanonicalRegistry::new(index.clone(), settings.search.enable_synonym_partial);
            let label: cinegraph_core::EntityLabel = entity_type.parse().expect("infallible");
            match registry.add_synonyms(&name, &label, &synonyms).await? {
                Some(merged) => println!("{}", serde_json::to_string_pretty(&merged)?),
                None => anyhow::bail!("no entity record found for '{}' ({})", name, entity_type),
            }
        }
        Commands::Query { question } => {
            let embedder = Arc::new(
                HttpEmbeddingProvider::new(settings.embedding.clone()).context("embedding client")?,
            );
            let llm = Arc::new(AnthropicProvider::new(settings.llm.clone()).context("llm client")?);
            let registry = Arc::new(CanonicalRegistry::new(
                index.clone(),
                settings.search.enable_synonym_partial,
            ));
            let web = match WebSearchClient::new(settings.websearch.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!("web search disabled: {}", e);
                    None
                }
            };
            let tools = Arc::new(AgentTools::new(graph.clone(), web));
            let router = QueryRouter::new(
                graph,
                index,
                registry,
                embedder,
                llm,
                tools,
                settings.query.clone(),
            );

            let result = router.run_query(&question).await?;
            println!("{}", result.answer);
        }
        Commands::Clear => {
            graph.clear_all().await?;
            info!("graph cleared");
        }
        Commands::Stats => {
            let stats = graph.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
