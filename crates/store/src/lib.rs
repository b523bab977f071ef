pub mod embeddings;
pub mod vector;

pub use embeddings::{EmbeddingClient, EmbeddingProvider};
pub use vector::{IndexEntry, IndexMeta, ScoredChunk, VectorStore};
