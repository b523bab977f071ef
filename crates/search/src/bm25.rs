use std::collections::HashMap;

use corpus::Chunk;
use corpus::text::is_cjk;
use store::ScoredChunk;
use tracing::info;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// In-memory BM25 index over the current chunk set. Never persisted;
/// rebuilt from scratch on every (re)ingest.
pub struct Bm25Index {
    chunks: Vec<Chunk>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f32,
}

impl Bm25Index {
    pub fn build(chunks: Vec<Chunk>) -> Self {
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in &chunks {
            let tokens = tokenize(&chunk.text);
            doc_lens.push(tokens.len());

            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let avg_len = if doc_lens.is_empty() {
            1.0
        } else {
            (doc_lens.iter().sum::<usize>() as f32 / doc_lens.len() as f32).max(1.0)
        };

        info!(chunks = chunks.len(), terms = doc_freq.len(), "Built BM25 index");

        Self {
            chunks,
            term_freqs,
            doc_lens,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top-`k` chunks by BM25 score. Deterministic for a fixed chunk set:
    /// ties break by chunk position.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        if self.chunks.is_empty() {
            return Vec::new();
        }

        let mut query_terms = tokenize(query);
        query_terms.sort_unstable();
        query_terms.dedup();
        let n = self.chunks.len() as f32;

        let mut scored: Vec<(usize, f32)> = Vec::new();
        for (i, freqs) in self.term_freqs.iter().enumerate() {
            let dl = self.doc_lens[i] as f32;
            let mut score = 0.0;

            for term in &query_terms {
                let tf = *freqs.get(term).unwrap_or(&0) as f32;
                if tf == 0.0 {
                    continue;
                }
                let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / self.avg_len));
            }

            if score > 0.0 {
                scored.push((i, score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

/// Lowercased alphanumeric words plus CJK bigrams (and unigrams), so
/// Japanese text indexes without a morphological segmenter.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            if let Some(prev) = prev_cjk {
                tokens.push(format!("{prev}{c}"));
            }
            tokens.push(c.to_string());
            prev_cjk = Some(c);
        } else if c.is_alphanumeric() {
            word.push(c.to_ascii_lowercase());
            prev_cjk = None;
        } else {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            prev_cjk = None;
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}
