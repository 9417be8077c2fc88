use crate::{FieldTermConfig, LexicalQuery, NewsDocument, Result, ScoredHit, TermStat};

/// Lexical document store consumed by the engine.
///
/// Lookups that miss return `Ok(None)`; `Err` is reserved for store failures.
pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> anyhow::Result<Option<NewsDocument>>;

    /// Ranked hits for `query`, best first.
    fn search(&self, query: &LexicalQuery, size: usize) -> Result<Vec<ScoredHit>>;

    /// Filtered term statistics for one field of one document, best scoring
    /// term first. `None` when the document is missing.
    fn term_vectors(&self, id: &str, filter: &FieldTermConfig) -> Result<Option<Vec<TermStat>>>;

    /// Score `query` would assign to document `id`; `0.0` when it does not
    /// match and [`EngineError::NotFound`](crate::EngineError::NotFound) when
    /// the document is missing.
    fn explain(&self, id: &str, query: &LexicalQuery) -> Result<f32>;
}
