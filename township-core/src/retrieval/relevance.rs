//! Relevance strategies: how similar a memory's content is to the query.
//!
//! Every strategy must be deterministic and bounded to `[0, 1]`. Two are
//! provided: token-set overlap and a hashed bag-of-words embedding.

use std::collections::BTreeSet;

use crate::config::{RelevanceKind, RetrievalConfig};

/// Score content against a query.
///
/// Implementations must be `Send + Sync` so the store can be shared across
/// runtime tasks.
pub trait RelevanceScorer: Send + Sync + std::fmt::Debug {
    /// Similarity in `[0, 1]`. Identical inputs always give identical output.
    fn score(&self, content: &str, query: &str) -> f64;

    /// A short name for logs.
    fn name(&self) -> &'static str;
}

/// Build the scorer named by the configuration.
#[must_use]
pub fn from_config(config: &RetrievalConfig) -> Box<dyn RelevanceScorer> {
    match config.relevance {
        RelevanceKind::Lexical => Box::new(LexicalOverlap),
        RelevanceKind::Embedding => Box::new(HashedEmbedding::new(config.embedding_dimensions)),
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "in", "is", "of", "on", "or", "the", "to", "was", "with",
];

/// Lower-cased alphanumeric tokens with stop-words removed.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

// ---------------------------------------------------------------------------
// Lexical overlap
// ---------------------------------------------------------------------------

/// Jaccard similarity between the token sets of content and query.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlap;

impl RelevanceScorer for LexicalOverlap {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, content: &str, query: &str) -> f64 {
        let a: BTreeSet<String> = tokenize(content).into_iter().collect();
        let b: BTreeSet<String> = tokenize(query).into_iter().collect();
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(&b).count();
        let union = a.union(&b).count();
        shared as f64 / union as f64
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}

// ---------------------------------------------------------------------------
// Hashed embedding
// ---------------------------------------------------------------------------

/// Bag-of-words embedding using FNV-1a feature hashing; cosine similarity
/// clamped at zero.
#[derive(Debug, Clone, Copy)]
pub struct HashedEmbedding {
    dimensions: usize,
}

impl HashedEmbedding {
    /// Create an embedder with `dimensions` buckets (at least 1).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed text into a fixed-width vector.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dimensions];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            // sign bit spreads collisions around zero
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        v
    }
}

impl RelevanceScorer for HashedEmbedding {
    fn score(&self, content: &str, query: &str) -> f64 {
        let sim = cosine_similarity(&self.embed(content), &self.embed(query));
        f64::from(sim.clamp(0.0, 1.0))
    }

    fn name(&self) -> &'static str {
        "embedding"
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Compute the cosine similarity between two vectors.
///
/// Returns a value in \[-1.0, 1.0\], or `0.0` if the lengths differ or either
/// vector has zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_stop_words_and_case() {
        assert_eq!(tokenize("Saw Ben at the Cafe!"), vec!["saw", "ben", "cafe"]);
    }

    #[test]
    fn lexical_overlap_is_bounded() {
        let s = LexicalOverlap;
        assert!((s.score("coffee at the cafe", "cafe coffee") - 1.0).abs() < 1e-9);
        assert_eq!(s.score("coffee", "tractor"), 0.0);
        assert_eq!(s.score("", "tractor"), 0.0);
        let partial = s.score("ben drank coffee", "coffee with aiko");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn embedding_matches_itself() {
        let e = HashedEmbedding::new(64);
        assert!((e.score("planting beans on the farm", "planting beans on the farm") - 1.0).abs() < 1e-6);
        assert_eq!(e.score("", "anything"), 0.0);
        let s = e.score("farm beans", "cafe espresso");
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn scorers_are_deterministic() {
        let e = HashedEmbedding::new(32);
        assert_eq!(e.embed("same words"), e.embed("same words"));
        assert_eq!(
            LexicalOverlap.score("a b c", "b c d"),
            LexicalOverlap.score("a b c", "b c d")
        );
    }
}
