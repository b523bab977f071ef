use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use corpus::Chunk;

use crate::embeddings::EmbeddingClient;

const VECTORS_FILE: &str = "vectors.json";
const META_FILE: &str = "meta.json";

/// One indexed chunk with its embedding. Owned by the store; rebuilt on
/// reingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    pub model: String,
    pub dimension: usize,
    pub num_chunks: usize,
    pub created_at: String,
}

/// A chunk with its relevance signal, as returned by the retrievers.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// File-persisted similarity index: embeddings live in `vectors.json`
/// next to a `meta.json` marker, searched by brute-force cosine.
pub struct VectorStore {
    entries: Vec<IndexEntry>,
    embedder: EmbeddingClient,
}

impl VectorStore {
    /// Embed every chunk and persist the result under `dir`.
    pub async fn build(
        chunks: &[Chunk],
        embedder: EmbeddingClient,
        dir: &Path,
    ) -> Result<VectorStore> {
        info!(chunks = chunks.len(), "Building vector store");

        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = embedder
                .embed(&chunk.text)
                .await
                .with_context(|| format!("Failed to embed chunk {}", chunk.id))?;
            entries.push(IndexEntry {
                chunk: chunk.clone(),
                embedding,
            });
        }

        let store = VectorStore::from_entries(entries, embedder);
        store.save(dir)?;
        info!(entries = store.len(), dir = %dir.display(), "Vector store persisted");
        Ok(store)
    }

    pub fn from_entries(entries: Vec<IndexEntry>, embedder: EmbeddingClient) -> Self {
        Self { entries, embedder }
    }

    /// The degraded store: nothing indexed, every search returns nothing.
    pub fn empty(embedder: EmbeddingClient) -> Self {
        Self {
            entries: Vec::new(),
            embedder,
        }
    }

    /// Reopen a persisted store without re-embedding anything.
    pub fn load(dir: &Path, embedder: EmbeddingClient) -> Result<VectorStore> {
        let meta_json = fs::read_to_string(dir.join(META_FILE))
            .context("Failed to read vector store metadata")?;
        let meta: IndexMeta = serde_json::from_str(&meta_json)?;

        let vectors_json =
            fs::read_to_string(dir.join(VECTORS_FILE)).context("Failed to read vector data")?;
        let entries: Vec<IndexEntry> = serde_json::from_str(&vectors_json)?;

        info!(
            entries = entries.len(),
            model = %meta.model,
            created_at = %meta.created_at,
            "Loaded persisted vector store"
        );
        Ok(VectorStore::from_entries(entries, embedder))
    }

    /// Whether a persisted store is present at `dir`, by its marker files.
    pub fn exists(dir: &Path) -> bool {
        dir.join(META_FILE).exists() && dir.join(VECTORS_FILE).exists()
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).context("Failed to create vector store directory")?;

        let meta = IndexMeta {
            model: self.embedder.model().to_string(),
            dimension: self.entries.first().map_or(0, |e| e.embedding.len()),
            num_chunks: self.entries.len(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        fs::write(
            dir.join(VECTORS_FILE),
            serde_json::to_string(&self.entries)?,
        )?;
        fs::write(dir.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-`k` chunks by cosine similarity to the query.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        Ok(rank(&self.entries, &query_embedding, k))
    }
}

/// Score entries against a query vector and keep the top `k`. Ties break
/// by index order so repeated searches are reproducible.
pub fn rank(entries: &[IndexEntry], query: &[f32], k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<(usize, f32)> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (i, cosine_similarity(&e.embedding, query)))
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, score)| ScoredChunk {
            chunk: entries[i].chunk.clone(),
            score,
        })
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingProvider;

    fn test_embedder() -> EmbeddingClient {
        EmbeddingClient::new(
            EmbeddingProvider::Ollama {
                base_url: "http://localhost:11434".to_string(),
            },
            "nomic-embed-text".to_string(),
        )
    }

    fn entry(id: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk::new(id.to_string(), format!("{id}.txt"), None, 0),
            embedding,
        }
    }

    #[test]
    fn rank_orders_by_cosine_similarity() {
        let entries = vec![
            entry("far", vec![0.0, 1.0]),
            entry("near", vec![1.0, 0.0]),
            entry("mid", vec![1.0, 1.0]),
        ];

        let results = rank(&entries, &[1.0, 0.0], 3);
        assert_eq!(results[0].chunk.text, "near");
        assert_eq!(results[1].chunk.text, "mid");
        assert_eq!(results[2].chunk.text, "far");
    }

    #[test]
    fn rank_truncates_to_k_and_ties_break_by_index() {
        let entries = vec![
            entry("first", vec![1.0, 0.0]),
            entry("second", vec![1.0, 0.0]),
            entry("third", vec![1.0, 0.0]),
        ];

        let results = rank(&entries, &[1.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "first");
        assert_eq!(results[1].chunk.text, "second");
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn empty_store_returns_no_results_without_embedding() {
        // No live Ollama behind this client; search must short-circuit.
        let store = VectorStore::empty(test_embedder());
        let results = store.search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            entry("alpha", vec![1.0, 0.0]),
            entry("beta", vec![0.0, 1.0]),
        ];

        assert!(!VectorStore::exists(dir.path()));

        let store = VectorStore::from_entries(entries, test_embedder());
        store.save(dir.path()).unwrap();
        assert!(VectorStore::exists(dir.path()));

        let reloaded = VectorStore::load(dir.path(), test_embedder()).unwrap();
        assert_eq!(reloaded.len(), 2);

        let meta: IndexMeta = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("meta.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(meta.num_chunks, 2);
        assert_eq!(meta.dimension, 2);
    }

    #[test]
    fn missing_store_is_reported_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!VectorStore::exists(dir.path()));
        assert!(VectorStore::load(dir.path(), test_embedder()).is_err());
    }
}
