pub mod mappings;
pub mod memory;
pub mod opensearch;
pub mod registry;
pub mod synonym;

pub use memory::MemoryIndex;
pub use opensearch::OpenSearchIndex;
pub use registry::CanonicalRegistry;
pub use synonym::merge_synonyms;
