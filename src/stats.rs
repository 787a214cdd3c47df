//! `evidex stats`: what is indexed, and how retrieval has been doing.
//!
//! Reads `metadata.json` from the cache directory and replays the metrics
//! log, so it works without loading embeddings or contacting a provider.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::metrics::{replay_log, MetricsSummary};
use crate::persist::{read_metadata, IndexMetadata};

#[derive(Debug, Serialize)]
struct StatsReport {
    cache_dir: String,
    index: Option<IndexMetadata>,
    metrics_log: String,
    metrics: MetricsSummary,
}

pub fn run_stats(config: &Config, json: bool) -> Result<()> {
    let index = match read_metadata(&config.index.cache_dir) {
        Ok(metadata) => Some(metadata),
        Err(evidex_core::Error::IndexNotFound { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    let metrics = replay_log(&config.metrics.log_path, &config.metrics.top_k_thresholds)?.summary();

    let report = StatsReport {
        cache_dir: config.index.cache_dir.display().to_string(),
        index,
        metrics_log: config.metrics.log_path.display().to_string(),
        metrics,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("evidex stats");
    println!("============");
    println!();
    println!("  Index:       {}", report.cache_dir);
    match &report.index {
        Some(meta) => {
            println!("  Chunks:      {}", meta.chunk_count);
            println!("  Dimension:   {}", meta.embedding_dim);
            println!("  Model:       {}", meta.embedding_model_name);
            if !meta.tokenizer.is_empty() {
                println!("  Tokenizer:   {}", meta.tokenizer);
            }
            if let Some(created) = meta.created_at {
                println!("  Built:       {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        None => println!("  (no index built yet)"),
    }

    let m = &report.metrics;
    println!();
    println!("  Metrics log: {}", report.metrics_log);
    println!("  Queries:     {}", m.total_queries);
    if m.total_queries > 0 {
        println!("  Avg latency: {:.3} ms", m.avg_latency_ms);
        println!("  Avg results: {:.2}", m.avg_retrieved);
        for (k, rate) in &m.topk_hit_rate.0 {
            println!("  top@{:<3}      {:.1}%", k, rate * 100.0);
        }
        for (reason, count) in &m.degradation_counts {
            println!("  degraded ({}): {}", reason, count);
        }
    }
    println!();
    Ok(())
}
