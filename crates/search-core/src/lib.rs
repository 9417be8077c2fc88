pub mod ann;
pub mod fusion;
pub mod keywords;
pub mod lexical;
pub mod source;
pub mod vector;

pub use ann::AnnGraph;
pub use fusion::{FusedCandidates, RetrievalFusion, merge_channels};
pub use keywords::{KeywordExtractor, denormalize, denormalize_all};
pub use lexical::TantivyDocumentStore;
pub use source::{EmbeddingSource, first_paragraph};
pub use vector::{VectorStorage, VectorStorageConfig, sidecar_path};
