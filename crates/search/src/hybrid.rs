use std::collections::HashMap;
use std::collections::hash_map::Entry;

use store::{ScoredChunk, VectorStore};
use tracing::warn;

use crate::bm25::Bm25Index;

// Reciprocal-rank constant, per the usual RRF formulation.
const RRF_C: f32 = 60.0;

pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;
pub const DEFAULT_LEXICAL_WEIGHT: f32 = 0.4;
pub const DEFAULT_TOP_K: usize = 10;

/// Combines the vector store's and the BM25 index's top-k lists with
/// weighted reciprocal-rank fusion. The vector signal gets the larger
/// weight because it tolerates paraphrase; the lexical one still rescues
/// exact-term queries like part numbers and proper nouns.
pub struct HybridRetriever {
    vector: VectorStore,
    lexical: Bm25Index,
    vector_weight: f32,
    lexical_weight: f32,
    top_k: usize,
}

impl HybridRetriever {
    pub fn new(vector: VectorStore, lexical: Bm25Index) -> Self {
        Self::with_params(
            vector,
            lexical,
            DEFAULT_VECTOR_WEIGHT,
            DEFAULT_LEXICAL_WEIGHT,
            DEFAULT_TOP_K,
        )
    }

    pub fn with_params(
        vector: VectorStore,
        lexical: Bm25Index,
        vector_weight: f32,
        lexical_weight: f32,
        top_k: usize,
    ) -> Self {
        Self {
            vector,
            lexical,
            vector_weight,
            lexical_weight,
            top_k,
        }
    }

    /// The fused top-k for a query. A failing vector search (embedding
    /// backend down, empty store) degrades to lexical-only results rather
    /// than failing the query.
    pub async fn retrieve(&self, query: &str) -> Vec<ScoredChunk> {
        let dense = match self.vector.search(query, self.top_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Vector search failed, falling back to lexical only");
                Vec::new()
            }
        };
        let sparse = self.lexical.search(query, self.top_k);

        fuse(
            dense,
            sparse,
            self.vector_weight,
            self.lexical_weight,
            self.top_k,
        )
    }
}

/// Weighted reciprocal-rank fusion of two ranked lists. Deterministic:
/// ties break by first appearance (dense list first, each in sub-ranker
/// order).
pub fn fuse(
    dense: Vec<ScoredChunk>,
    sparse: Vec<ScoredChunk>,
    vector_weight: f32,
    lexical_weight: f32,
    k: usize,
) -> Vec<ScoredChunk> {
    // chunk id -> (result, fused score, first-seen order)
    let mut fused: HashMap<String, (ScoredChunk, f32, usize)> = HashMap::new();
    let mut order = 0usize;

    for (list, weight) in [(dense, vector_weight), (sparse, lexical_weight)] {
        for (rank, result) in list.into_iter().enumerate() {
            let contribution = weight / (RRF_C + (rank + 1) as f32);
            match fused.entry(result.chunk.id.clone()) {
                Entry::Occupied(mut occupied) => occupied.get_mut().1 += contribution,
                Entry::Vacant(vacant) => {
                    vacant.insert((result, contribution, order));
                    order += 1;
                }
            }
        }
    }

    let mut results: Vec<(ScoredChunk, f32, usize)> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
    });
    results.truncate(k);

    results
        .into_iter()
        .map(|(mut result, score, _)| {
            result.score = score;
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus::Chunk;

    fn scored(id_text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk::new(id_text.to_string(), "test.txt".to_string(), None, 0),
            score,
        }
    }

    #[test]
    fn chunk_in_both_lists_outranks_single_list_hits() {
        let dense = vec![scored("only-dense", 0.9), scored("shared", 0.8)];
        let sparse = vec![scored("shared", 5.0), scored("only-sparse", 3.0)];

        let results = fuse(dense, sparse, 0.6, 0.4, 10);
        // shared: 0.6/62 + 0.4/61 > 0.6/61 (only-dense)
        assert_eq!(results[0].chunk.text, "shared");
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn vector_weight_dominates_at_equal_rank() {
        let dense = vec![scored("dense-top", 0.9)];
        let sparse = vec![scored("sparse-top", 9.0)];

        let results = fuse(dense, sparse, 0.6, 0.4, 10);
        assert_eq!(results[0].chunk.text, "dense-top");
        assert_eq!(results[1].chunk.text, "sparse-top");
    }

    #[test]
    fn fusion_is_deterministic() {
        let make = || {
            (
                vec![scored("a", 0.9), scored("b", 0.8)],
                vec![scored("c", 4.0), scored("a", 2.0)],
            )
        };

        let (d1, s1) = make();
        let (d2, s2) = make();
        let order = |r: Vec<ScoredChunk>| {
            r.into_iter().map(|s| s.chunk.text).collect::<Vec<_>>()
        };
        assert_eq!(
            order(fuse(d1, s1, 0.6, 0.4, 10)),
            order(fuse(d2, s2, 0.6, 0.4, 10))
        );
    }

    #[test]
    fn ties_break_by_sub_ranker_order() {
        // Same weight, same rank in disjoint lists: the dense hit was seen
        // first and must stay first.
        let dense = vec![scored("from-dense", 0.5)];
        let sparse = vec![scored("from-sparse", 0.5)];

        let results = fuse(dense, sparse, 0.5, 0.5, 10);
        assert_eq!(results[0].chunk.text, "from-dense");
        assert_eq!(results[1].chunk.text, "from-sparse");
    }

    #[test]
    fn truncates_to_k() {
        let dense = vec![scored("a", 0.9), scored("b", 0.8), scored("c", 0.7)];
        let results = fuse(dense, Vec::new(), 0.6, 0.4, 2);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn both_empty_yields_empty() {
        assert!(fuse(Vec::new(), Vec::new(), 0.6, 0.4, 5).is_empty());
    }
}
