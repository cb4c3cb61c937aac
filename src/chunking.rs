//! Sentence-aware splitting of normalized page text into overlapping,
//! bounded-length chunks.
//!
//! The chunker is deterministic: the same input and configuration always
//! produce the same chunk sequence. Lengths are measured in bytes of UTF-8;
//! every cut lands on a char boundary.

use unicode_segmentation::UnicodeSegmentation;

/// Tuning knobs for [`TextChunker`].
#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    /// Soft upper bound on chunk length. A single sentence longer than this
    /// still becomes one oversized chunk rather than being split mid-sentence.
    pub max_length: usize,
    /// Number of trailing bytes of a closed chunk carried into the next chunk.
    pub overlap: usize,
    /// Chunks shorter than this are not closed on their own; the current chunk
    /// keeps growing past `max_length` instead so no text is dropped.
    pub min_chunk_length: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_length: 1000,
            overlap: 100,
            min_chunk_length: 50,
        }
    }
}

/// Deterministic, sentence-aware chunker.
#[derive(Clone, Debug, Default)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `text` into ordered, overlapping chunks.
    ///
    /// Returns an empty vector only for whitespace-only input; any non-empty
    /// text yields at least one chunk (falling back to a single truncated
    /// chunk when nothing meets `min_chunk_length`).
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let max_length = self.config.max_length.max(1);
        let min_length = self.config.min_chunk_length.min(max_length);
        // An overlap that dominates the budget would stall progress.
        let overlap = self.config.overlap.min(max_length / 2);

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        // Bytes at the head of `current` that were carried over from the
        // previous chunk; only material past this point is new.
        let mut seed_len = 0usize;

        for sentence in text.split_sentence_bounds() {
            if !current.is_empty() && current.len() + sentence.len() > max_length {
                if current.trim_end().len() >= min_length {
                    let closed = current.trim_end().to_string();
                    let mut seed = overlap_seed(&closed, overlap);
                    if !seed.is_empty() && !seed.ends_with(char::is_whitespace) {
                        seed.push(' ');
                    }
                    chunks.push(closed);
                    seed_len = seed.len();
                    current = seed;
                }
                // Otherwise the chunk is still below min_chunk_length: keep
                // extending past max_length so the text is not lost.
            }
            current.push_str(sentence);
        }

        if current.len() > seed_len {
            let tail = current.trim().to_string();
            if tail.len() >= min_length {
                chunks.push(tail);
            } else if chunks.is_empty() {
                // Very short input: nothing ever met min_chunk_length. Emit
                // one bounded chunk rather than none.
                chunks.push(truncate_on_char_boundary(&tail, max_length).to_string());
            } else if let Some(last) = chunks.last_mut() {
                // The leftover is too short to stand alone; fold the new
                // material (past the overlap seed) into the previous chunk.
                let fresh = current[seed_len..].trim();
                if !fresh.is_empty() {
                    if !last.ends_with(char::is_whitespace) {
                        last.push(' ');
                    }
                    last.push_str(fresh);
                }
            }
        }

        chunks
    }
}

/// Returns the tail of `closed` to seed the next chunk with, preferring a
/// sentence boundary inside the overlap window over a hard byte cut.
fn overlap_seed(closed: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    if closed.len() <= overlap {
        return closed.to_string();
    }

    let window_start = closed.len() - overlap;
    let mut offset = 0usize;
    for sentence in closed.split_sentence_bounds() {
        if offset >= window_start {
            return closed[offset..].trim_start().to_string();
        }
        offset += sentence.len();
    }

    let mut cut = window_start;
    while !closed.is_char_boundary(cut) {
        cut += 1;
    }
    closed[cut..].trim_start().to_string()
}

fn truncate_on_char_boundary(text: &str, max_length: usize) -> &str {
    if text.len() <= max_length {
        return text;
    }
    let mut cut = max_length;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_length: usize, overlap: usize, min_chunk_length: usize) -> TextChunker {
        TextChunker::new(ChunkerConfig {
            max_length,
            overlap,
            min_chunk_length,
        })
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunker(100, 10, 5).chunk("").is_empty());
        assert!(chunker(100, 10, 5).chunk("   \n\t ").is_empty());
    }

    #[test]
    fn short_input_yields_single_chunk() {
        let chunks = chunker(100, 10, 50).chunk("Tiny.");
        assert_eq!(chunks, vec!["Tiny.".to_string()]);
    }

    #[test]
    fn three_sentences_split_with_overlap() {
        let chunks =
            chunker(20, 5, 5).chunk("Sentence one. Sentence two. Sentence three.");
        assert!(chunks.len() >= 2, "expected at least two chunks: {chunks:?}");
        for chunk in &chunks {
            assert!(
                chunk.len() <= 20 + 15,
                "chunk far exceeds the bound: {chunk:?}"
            );
        }
        // Every sentence must survive somewhere.
        for needle in ["Sentence one", "Sentence two", "Sentence three"] {
            assert!(
                chunks.iter().any(|c| c.contains(needle)),
                "{needle} missing from {chunks:?}"
            );
        }
    }

    #[test]
    fn chunks_respect_max_length_for_multi_sentence_input() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa lambda mu. \
                    Nu xi omicron. Pi rho sigma. Tau upsilon phi. Chi psi omega.";
        let chunks = chunker(60, 15, 10).chunk(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.len() <= 60, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn oversized_single_sentence_becomes_one_chunk() {
        let long = "word ".repeat(50).trim_end().to_string() + ".";
        let chunks = chunker(40, 10, 5).chunk(&long);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].len() > 40);
    }

    #[test]
    fn deterministic_across_calls() {
        let text = "First sentence here. Second sentence there. Third sentence follows. \
                    Fourth sentence ends the paragraph. Fifth keeps going.";
        let c = chunker(50, 12, 10);
        assert_eq!(c.chunk(text), c.chunk(text));
    }

    #[test]
    fn every_sentence_is_covered() {
        let sentences: Vec<String> = (0..30)
            .map(|i| format!("Sentence number {i} says something distinct."))
            .collect();
        let text = sentences.join(" ");
        let chunks = chunker(120, 30, 20).chunk(&text);
        for sentence in &sentences {
            assert!(
                chunks.iter().any(|c| c.contains(sentence.trim())),
                "lost sentence: {sentence}"
            );
        }
    }

    #[test]
    fn overlap_repeats_tail_of_previous_chunk() {
        let text = "One two three four five. Six seven eight nine ten. \
                    Eleven twelve thirteen fourteen.";
        let chunks = chunker(40, 12, 5).chunk(&text);
        assert!(chunks.len() >= 2);
        // The second chunk starts with material from the end of the first.
        let first = &chunks[0];
        let second = &chunks[1];
        let carried: &str = second.split('.').next().unwrap_or("");
        assert!(
            !carried.is_empty() && first.contains(carried.trim()),
            "no overlap carried from {first:?} into {second:?}"
        );
    }

    #[test]
    fn below_minimum_input_still_yields_one_chunk() {
        let chunks = chunker(100, 10, 40).chunk("Too short to close.");
        assert_eq!(chunks, vec!["Too short to close.".to_string()]);
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_char() {
        let text = "Größe straße äöü ßßß. Über allen Gipfeln ist Ruh. \
                    Warte nur balde ruhest du auch.";
        for chunk in chunker(30, 8, 5).chunk(text) {
            // Would panic on an invalid boundary when re-sliced.
            assert_eq!(chunk, chunk.as_str());
            assert!(!chunk.is_empty());
        }
    }
}
