use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// Persisted graph and side-car disagree or one half is missing.
    #[error("inconsistent vector storage: {0}")]
    Consistency(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("vector storage is full: capacity {capacity}, requested {requested}")]
    CapacityExceeded { capacity: usize, requested: usize },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("external id already stored: {0}")]
    DuplicateId(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
