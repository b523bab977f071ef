use crate::chunk::{Chunk, Document};
use crate::text::{char_len, char_tail};

/// Recursive character splitter. Tries separators in priority order
/// (paragraph break, line break, Japanese sentence/clause punctuation,
/// space) and only falls back to hard character cuts when nothing softer
/// fits; adjacent chunks carry a fixed character overlap across the cut.
pub struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl Splitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: vec!["\n\n", "\n", "。", "、", " ", ""],
        }
    }

    pub fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            for (offset, text) in self.split_text(&doc.text) {
                if text.trim().is_empty() {
                    continue;
                }
                chunks.push(Chunk::new(text, doc.source.clone(), doc.page, offset));
            }
        }
        chunks
    }

    /// Split one text into (char offset, chunk text) pairs.
    pub fn split_text(&self, text: &str) -> Vec<(usize, String)> {
        let pieces = self.atomize(text, 0, 0);
        self.merge(pieces)
    }

    // Cut `text` with the separator ladder until every piece fits the
    // chunk size. Separators stay attached to the piece they terminate,
    // so merging is plain concatenation.
    fn atomize(&self, text: &str, base: usize, sep_idx: usize) -> Vec<(usize, String)> {
        if char_len(text) <= self.chunk_size || sep_idx >= self.separators.len() {
            return vec![(base, text.to_string())];
        }

        let sep = self.separators[sep_idx];
        if sep.is_empty() {
            // Last rung: hard cut every chunk_size characters.
            let chars: Vec<char> = text.chars().collect();
            return chars
                .chunks(self.chunk_size)
                .enumerate()
                .map(|(i, window)| (base + i * self.chunk_size, window.iter().collect()))
                .collect();
        }

        let mut pieces = Vec::new();
        let mut pos = base;
        for part in split_keep(text, sep) {
            let part_len = char_len(&part);
            if part_len > self.chunk_size {
                pieces.extend(self.atomize(&part, pos, sep_idx + 1));
            } else {
                pieces.push((pos, part));
            }
            pos += part_len;
        }
        pieces
    }

    // Greedily pack atomic pieces into chunks of at most chunk_size chars,
    // seeding each new chunk with the overlap tail of the previous one.
    fn merge(&self, pieces: Vec<(usize, String)>) -> Vec<(usize, String)> {
        let mut chunks = Vec::new();
        let mut buf = String::new();
        let mut buf_start = 0usize;

        for (pos, piece) in pieces {
            let piece_len = char_len(&piece);

            if buf.is_empty() {
                buf_start = pos;
                buf = piece;
                continue;
            }

            if char_len(&buf) + piece_len > self.chunk_size {
                let mut tail = char_tail(&buf, self.chunk_overlap);
                // A near-full piece can leave no room for the whole
                // overlap; shrink the tail rather than overflow the chunk.
                while !tail.is_empty() && char_len(&tail) + piece_len > self.chunk_size {
                    let mut cs = tail.chars();
                    cs.next();
                    tail = cs.as_str().to_string();
                }
                chunks.push((buf_start, std::mem::take(&mut buf)));
                buf_start = pos - char_len(&tail);
                buf = tail;
            }

            buf.push_str(&piece);
        }

        if !buf.trim().is_empty() {
            chunks.push((buf_start, buf));
        }
        chunks
    }
}

// `text.split(sep)` but with the separator kept at the end of each piece.
fn split_keep(text: &str, sep: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(sep) {
        let end = idx + sep.len();
        parts.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document {
            text: text.to_string(),
            source: "test.txt".to_string(),
            page: None,
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = Splitter::new(100, 20);
        let chunks = splitter.split(&[doc("just a short paragraph")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a short paragraph");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn every_chunk_respects_the_size_limit() {
        let words: Vec<String> = (0..200).map(|i| format!("word{:03}", i)).collect();
        let text = words.join(" ");
        let splitter = Splitter::new(100, 20);

        let chunks = splitter.split(&[doc(&text)]);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                char_len(&chunk.text) <= 100,
                "chunk of {} chars exceeds limit",
                char_len(&chunk.text)
            );
        }
    }

    #[test]
    fn adjacent_chunks_share_the_overlap() {
        let words: Vec<String> = (0..200).map(|i| format!("word{:03}", i)).collect();
        let text = words.join(" ");
        let splitter = Splitter::new(100, 20);

        let chunks = splitter.split(&[doc(&text)]);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_tail = char_tail(&pair[0].text, 20);
            let next_head: String = pair[1].text.chars().take(20).collect();
            assert_eq!(prev_tail, next_head);
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let splitter = Splitter::new(100, 0);

        let chunks = splitter.split(&[doc(&text)]);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with('a'));
        assert!(chunks[1].text.starts_with('b'));
    }

    #[test]
    fn splits_japanese_text_at_sentence_punctuation() {
        let text = format!("{}。{}。", "燃".repeat(60), "缶".repeat(60));
        let splitter = Splitter::new(100, 0);

        let chunks = splitter.split(&[doc(&text)]);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with('。'));
        assert!(chunks[1].text.starts_with('缶'));
    }

    #[test]
    fn hard_cuts_unbroken_runs() {
        let text = "x".repeat(250);
        let splitter = Splitter::new(100, 0);

        let chunks = splitter.split(&[doc(&text)]);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| char_len(&c.text) <= 100));
    }

    #[test]
    fn offsets_track_positions_in_the_source() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let splitter = Splitter::new(100, 0);

        let chunks = splitter.split(&[doc(&text)]);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[1].offset, 62); // 60 chars + "\n\n"
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let splitter = Splitter::new(100, 20);
        assert!(splitter.split(&[doc("   \n  ")]).is_empty());
    }
}
