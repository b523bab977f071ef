pub mod chunk;
pub mod loader;
pub mod splitter;
pub mod text;

pub use chunk::{Chunk, Document};
pub use loader::load_documents;
pub use splitter::Splitter;
