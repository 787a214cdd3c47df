//! Retrieval with telemetry, and packaging of hits for downstream consumers.

use std::time::Instant;

use evidex_core::search::{HybridRetriever, RetrievedChunk};
use evidex_core::Result;
use serde::Serialize;

use crate::metrics::{DegradationReason, MetricsLogger, QueryEvent};

/// Retrieve `top_k` chunks for `query` and log the query to `logger`.
///
/// `best_rank` is the 1-based rank of the first result `match_fn` accepts.
/// An empty result is recorded with [`DegradationReason::EmptyResult`].
pub async fn retrieve_with_metrics<'a, F>(
    retriever: &HybridRetriever<'a>,
    logger: &MetricsLogger,
    query: &str,
    top_k: usize,
    match_fn: F,
    extra: serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<RetrievedChunk<'a>>>
where
    F: Fn(&RetrievedChunk<'a>) -> bool,
{
    let started = Instant::now();
    let results = retriever.retrieve(query, top_k).await?;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let best_rank = results.iter().position(&match_fn).map(|pos| pos + 1);
    let degradation = results.is_empty().then_some(DegradationReason::EmptyResult);

    logger.record(QueryEvent {
        query: query.to_string(),
        latency_ms,
        retrieved: results.len(),
        top_k,
        total_chunks: retriever.index().len(),
        best_rank,
        degradation,
        extra,
        timestamp: None,
    })?;
    Ok(results)
}

/// A retrieved chunk in citation form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    /// `E1`, `E2`, … in rank order.
    pub evidence_id: String,
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub section_title: Option<String>,
    pub page_number: Option<u32>,
    pub snippet: String,
    pub score: f64,
    pub dense_score: f64,
    pub bm25_score: f64,
}

pub fn package(results: &[RetrievedChunk<'_>], max_snippet_chars: usize) -> Vec<EvidenceItem> {
    results
        .iter()
        .enumerate()
        .map(|(i, hit)| EvidenceItem {
            evidence_id: format!("E{}", i + 1),
            chunk_id: hit.chunk.chunk_id.clone(),
            document_id: hit.chunk.document_id.clone(),
            source_path: hit.chunk.source.clone(),
            section_title: hit.chunk.section_title.clone(),
            page_number: hit.chunk.page_number,
            snippet: compact_snippet(&hit.chunk.content, max_snippet_chars),
            score: round4(hit.score),
            dense_score: round4(hit.dense_score),
            bm25_score: round4(hit.bm25_score),
        })
        .collect()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Collapse whitespace runs to single spaces and cut to `max_chars`,
/// marking the cut with `…`.
pub fn compact_snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push('…');
    cut
}
