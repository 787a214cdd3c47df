//! Hybrid dense + lexical retrieval with min-max score fusion.
//!
//! # Algorithm
//!
//! 1. **Dense phase**: encode the query and take the `dense_top_k` chunks
//!    with the highest inner product.
//! 2. **Lexical phase**: tokenize the query, BM25-score every chunk and keep
//!    the `bm25_top_k` chunks with a positive score.
//! 3. **Normalize** each candidate set independently with min-max scaling.
//!    A set whose scores are all equal (spread below `1e-9`) maps to 1.0 if
//!    that shared score is positive and to 0.0 otherwise.
//! 4. **Fuse** over the union: `alpha · dense + (1 − alpha) · bm25`, where a
//!    chunk missing from one set contributes 0 for it.
//! 5. Sort by fused score descending, ties by ascending `chunk_id`, and
//!    truncate to `top_k`.
//!
//! Raw (unnormalized) dense and BM25 scores are reported alongside the fused
//! score. No candidates means an empty result, never an error.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::index::ChunkIndex;
use crate::models::DocumentChunk;

pub const DEFAULT_DENSE_TOP_K: usize = 20;
pub const DEFAULT_BM25_TOP_K: usize = 20;
pub const DEFAULT_ALPHA: f64 = 0.6;

const FLAT_SPREAD: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrieverParams {
    pub dense_top_k: usize,
    pub bm25_top_k: usize,
    /// Weight of the dense score in `[0, 1]`.
    pub alpha: f64,
}

impl Default for RetrieverParams {
    fn default() -> Self {
        Self {
            dense_top_k: DEFAULT_DENSE_TOP_K,
            bm25_top_k: DEFAULT_BM25_TOP_K,
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// One ranked hit, borrowing its chunk from the index.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk<'a> {
    pub chunk: &'a DocumentChunk,
    /// Fused score in `[0, 1]`.
    pub score: f64,
    /// Raw inner product, 0 when the chunk was not a dense candidate.
    pub dense_score: f64,
    /// Raw BM25 score, 0 when the chunk was not a lexical candidate.
    pub bm25_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct HybridRetriever<'a> {
    index: &'a ChunkIndex,
    params: RetrieverParams,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(index: &'a ChunkIndex, params: RetrieverParams) -> Result<Self> {
        if !(0.0..=1.0).contains(&params.alpha) {
            return Err(Error::InvalidWeight(params.alpha));
        }
        Ok(Self { index, params })
    }

    pub fn index(&self) -> &'a ChunkIndex {
        self.index
    }

    pub fn params(&self) -> &RetrieverParams {
        &self.params
    }

    /// Encode `query` and rank the corpus against it.
    #[tracing::instrument(skip_all, fields(top_k = top_k))]
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk<'a>>> {
        if top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.index.encode_query(query).await?;
        self.rank(query, &query_vector, top_k)
    }

    /// Rank the corpus against a pre-computed query vector.
    pub fn rank(
        &self,
        query: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk<'a>>> {
        if top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let dense: BTreeMap<usize, f64> = self
            .index
            .dense()
            .search(query_vector, self.params.dense_top_k)?
            .into_iter()
            .map(|(pos, score)| (pos, score as f64))
            .collect();

        let tokens = self.index.tokenizer().tokenize(query);
        let lexical: BTreeMap<usize, f64> = self
            .index
            .bm25()
            .top_k(&tokens, self.params.bm25_top_k)
            .into_iter()
            .collect();

        tracing::debug!(
            dense = dense.len(),
            lexical = lexical.len(),
            "collected candidates"
        );

        let mut results: Vec<RetrievedChunk<'a>> = fuse(&dense, &lexical, self.params.alpha)
            .into_iter()
            .filter_map(|(pos, score)| {
                self.index.chunk(pos).map(|chunk| RetrievedChunk {
                    chunk,
                    score,
                    dense_score: dense.get(&pos).copied().unwrap_or(0.0),
                    bm25_score: lexical.get(&pos).copied().unwrap_or(0.0),
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        results.truncate(top_k);
        Ok(results)
    }
}

/// One-shot retrieval with a throwaway retriever.
pub async fn retrieve_evidence<'a>(
    index: &'a ChunkIndex,
    query: &str,
    top_k: usize,
    params: RetrieverParams,
) -> Result<Vec<RetrievedChunk<'a>>> {
    HybridRetriever::new(index, params)?
        .retrieve(query, top_k)
        .await
}

/// Min-max scale scores into `[0, 1]`.
pub fn normalize_scores(scores: &BTreeMap<usize, f64>) -> BTreeMap<usize, f64> {
    if scores.is_empty() {
        return BTreeMap::new();
    }

    let s_min = scores.values().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = s_max - s_min;

    scores
        .iter()
        .map(|(&pos, &raw)| {
            let norm = if spread < FLAT_SPREAD {
                if s_max > 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                (raw - s_min) / spread
            };
            (pos, norm)
        })
        .collect()
}

/// Weighted sum of the normalized dense and lexical maps over their union.
pub fn fuse(
    dense: &BTreeMap<usize, f64>,
    lexical: &BTreeMap<usize, f64>,
    alpha: f64,
) -> Vec<(usize, f64)> {
    let dense = normalize_scores(dense);
    let lexical = normalize_scores(lexical);

    let mut union: Vec<usize> = dense.keys().chain(lexical.keys()).copied().collect();
    union.sort_unstable();
    union.dedup();

    union
        .into_iter()
        .map(|pos| {
            let d = dense.get(&pos).copied().unwrap_or(0.0);
            let l = lexical.get(&pos).copied().unwrap_or(0.0);
            (pos, alpha * d + (1.0 - alpha) * l)
        })
        .collect()
}
