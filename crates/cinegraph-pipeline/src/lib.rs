pub mod artifacts;
pub mod catalog;
pub mod chunking;
pub mod extraction;
pub mod publish;
pub mod resolution;
pub mod summarize;
pub mod writer;

pub use artifacts::ArtifactStore;
pub use catalog::{CatalogSource, JsonCatalog, ReviewItem};
pub use chunking::{run_chunking, ChunkingStats, TextSplitter};
pub use extraction::{run_entity_extraction, ExtractionStats};
pub use publish::{run_chunks_to_index, run_entity_import, run_entity_to_index, PublishStats};
pub use resolution::{run_entity_resolution, ResolutionStats};
pub use summarize::{run_entity_summarization, SummarizeStats};
pub use writer::{GraphWriter, WriterStats};
