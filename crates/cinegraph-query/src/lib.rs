pub mod agentic;
pub mod fusion;
pub mod graph_search;
pub mod router;
pub mod tools;

pub use agentic::{run_entity_agent, AgenticOutcome};
pub use fusion::build_context;
pub use graph_search::{SmartGraphSearch, SmartSearchResult};
pub use router::{QueryAnswer, QueryRouter};
pub use tools::AgentTools;
