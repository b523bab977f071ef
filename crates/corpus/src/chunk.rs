use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A raw document as loaded from disk. PDF files yield one `Document` per
/// page; plain-text files yield a single one with no page number.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
}

/// The retrieval unit: a bounded slice of a document's text carrying its
/// provenance so answers can cite where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    /// Character offset of the chunk within its source document.
    pub offset: usize,
}

impl Chunk {
    pub fn new(text: String, source: String, page: Option<u32>, offset: usize) -> Self {
        let id = Self::generate_id(&source, &text, offset);
        Self {
            id,
            text,
            source,
            page,
            offset,
        }
    }

    /// Stable content-derived id, so re-ingesting the same corpus produces
    /// the same ids.
    fn generate_id(source: &str, text: &str, offset: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(offset.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}
