pub mod bm25;
pub mod hybrid;

pub use bm25::Bm25Index;
pub use hybrid::HybridRetriever;
