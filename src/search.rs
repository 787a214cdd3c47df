//! `evidex search`: query the cached index and print ranked evidence.

use anyhow::{Context, Result};
use evidex_core::search::HybridRetriever;
use evidex_core::tokenize::MixedScriptTokenizer;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::evidence::{package, retrieve_with_metrics};
use crate::metrics::MetricsLogger;
use crate::persist::load_index;

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    alpha: Option<f64>,
    json: bool,
) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let index = load_index(
        &config.index.cache_dir,
        embedder,
        Arc::new(MixedScriptTokenizer::new()),
    )
    .with_context(|| "Run `evidex build <paths>` first")?;

    let mut params = config.retrieval.params();
    if let Some(alpha) = alpha {
        params.alpha = alpha;
    }
    let retriever = HybridRetriever::new(&index, params)?;
    let logger = MetricsLogger::open(&config.metrics)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let mut extra = serde_json::Map::new();
    extra.insert("mode".to_string(), serde_json::json!("cli_search"));
    let results = retrieve_with_metrics(&retriever, &logger, query, top_k, |_| true, extra).await?;
    let evidence = package(&results, config.evidence.max_snippet_chars);

    if json {
        println!("{}", serde_json::to_string_pretty(&evidence)?);
        return Ok(());
    }

    if evidence.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for item in &evidence {
        println!(
            "{}. [{:.4}] {} / {}",
            item.evidence_id,
            item.score,
            item.document_id,
            item.section_title.as_deref().unwrap_or("(untitled)")
        );
        println!("    source: {}", item.source_path);
        if let Some(page) = item.page_number {
            println!("    page: {}", page);
        }
        println!(
            "    dense: {:.4}  bm25: {:.4}",
            item.dense_score, item.bm25_score
        );
        println!("    excerpt: \"{}\"", item.snippet);
        println!("    id: {}", item.chunk_id);
        println!();
    }
    Ok(())
}
