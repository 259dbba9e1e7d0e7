use thiserror::Error;

#[derive(Error, Debug)]
pub enum CinegraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("External error: {0}")]
    External(String),
}

impl CinegraphError {
    /// True when a write was rejected by the store's optimistic concurrency
    /// control and should be retried with backoff.
    pub fn is_conflict(&self) -> bool {
        match self {
            CinegraphError::Conflict(_) => true,
            CinegraphError::Graph(msg) | CinegraphError::External(msg) => {
                msg.contains("ConcurrentModification")
            }
            _ => false,
        }
    }

    /// Transport-level failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CinegraphError::Network(_) | CinegraphError::Timeout(_)
        ) || self.is_conflict()
    }
}

pub type Result<T> = std::result::Result<T, CinegraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_detected_from_wrapped_store_message() {
        let err = CinegraphError::Graph(
            "Neptune returned ConcurrentModificationException: please retry".to_string(),
        );
        assert!(err.is_conflict());
        assert!(err.is_transient());
    }

    #[test]
    fn plain_graph_error_is_not_a_conflict() {
        let err = CinegraphError::Graph("malformed query".to_string());
        assert!(!err.is_conflict());
    }
}
