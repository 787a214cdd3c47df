//! Retrieval benchmark harness.
//!
//! Runs a JSON Lines dataset of `{query, answer_substrings, corpus_hint}`
//! samples against a freshly built index. Each sample goes through
//! [`retrieve_with_metrics`] with a matcher that accepts a chunk when it
//! contains any expected answer (whitespace ignored), so the metrics log
//! and summary carry the Top-K hit rates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use evidex_core::search::{HybridRetriever, RetrievedChunk};
use serde::{Deserialize, Serialize};

use crate::builder::IndexBuilder;
use crate::config::Config;
use crate::evidence::retrieve_with_metrics;
use crate::metrics::{MetricsLogger, MetricsSummary};

const MISS_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BenchmarkSample {
    pub query: String,
    pub answer_substrings: Vec<String>,
    #[serde(default)]
    pub corpus_hint: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkMiss {
    pub query: String,
    pub expected: Vec<String>,
    pub retrieved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub samples: usize,
    pub corpus_files: Vec<PathBuf>,
    pub chunk_count: usize,
    pub summary: MetricsSummary,
    pub misses: Vec<BenchmarkMiss>,
}

/// Where the benchmark gets its corpus and writes its results.
#[derive(Debug, Clone, Default)]
pub struct BenchOptions {
    pub dataset: PathBuf,
    /// Explicit corpus; when empty, the samples' `corpus_hint`s are used.
    pub corpus: Vec<PathBuf>,
    /// Base for relative hints. Defaults to the dataset's directory.
    pub corpus_root: Option<PathBuf>,
    pub summary_output: Option<PathBuf>,
}

pub fn load_samples(path: &Path) -> Result<Vec<BenchmarkSample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

    let mut samples = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: BenchmarkSample = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid sample", path.display(), lineno + 1))?;
        samples.push(sample);
    }
    if samples.is_empty() {
        bail!("Dataset {} contains no samples", path.display());
    }
    Ok(samples)
}

/// Pick the corpus: explicit files, else every sample hint resolved
/// against `root`. Order-preserving de-duplication; missing files fail.
pub fn resolve_corpus_files(
    corpus: &[PathBuf],
    samples: &[BenchmarkSample],
    root: &Path,
) -> Result<Vec<PathBuf>> {
    let candidates: Vec<PathBuf> = if corpus.is_empty() {
        samples
            .iter()
            .flat_map(|s| s.corpus_hint.iter().map(|hint| root.join(hint)))
            .collect()
    } else {
        corpus.to_vec()
    };

    let mut seen = HashSet::new();
    let files: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect();

    if files.is_empty() {
        bail!("No corpus files found; pass --corpus or add corpus_hint to the samples");
    }
    let missing: Vec<String> = files
        .iter()
        .filter(|p| !p.exists())
        .map(|p| p.display().to_string())
        .collect();
    if !missing.is_empty() {
        bail!("Corpus files not found: {}", missing.join(", "));
    }
    Ok(files)
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect()
}

fn matches_any(content: &str, answers: &[String]) -> bool {
    let content = normalize_text(content);
    answers.iter().any(|answer| content.contains(answer.as_str()))
}

fn normalized_answers(answers: &[String]) -> Vec<String> {
    answers
        .iter()
        .map(|a| normalize_text(a))
        .filter(|a| !a.is_empty())
        .collect()
}

/// 1-based rank of the first result containing any answer.
pub fn find_best_rank(results: &[RetrievedChunk<'_>], answers: &[String]) -> Option<usize> {
    let answers = normalized_answers(answers);
    if answers.is_empty() {
        return None;
    }
    results
        .iter()
        .position(|hit| matches_any(&hit.chunk.content, &answers))
        .map(|pos| pos + 1)
}

#[tracing::instrument(skip_all, fields(dataset = %options.dataset.display()))]
pub async fn run_benchmark(config: &Config, options: &BenchOptions) -> Result<BenchmarkReport> {
    let samples = load_samples(&options.dataset)?;
    let root = match &options.corpus_root {
        Some(root) => root.clone(),
        None => options
            .dataset
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let corpus_files = resolve_corpus_files(&options.corpus, &samples, &root)?;
    tracing::info!(
        samples = samples.len(),
        files = corpus_files.len(),
        "loaded benchmark dataset"
    );

    let builder = IndexBuilder::from_config(config)?;
    let index = builder.build_from_files(&corpus_files).await?;
    let retriever = HybridRetriever::new(&index, config.retrieval.params())?;
    let logger = MetricsLogger::open(&config.metrics)
        .with_context(|| format!("Failed to open metrics log: {}", config.metrics.log_path.display()))?;
    let top_k = config.retrieval.top_k;

    let mut misses = Vec::new();
    for (sample_id, sample) in samples.iter().enumerate() {
        let answers = normalized_answers(&sample.answer_substrings);
        let mut extra = serde_json::Map::new();
        extra.insert("sample_id".to_string(), serde_json::json!(sample_id));
        extra.insert("corpus_hint".to_string(), serde_json::json!(sample.corpus_hint));
        extra.insert("mode".to_string(), serde_json::json!("benchmark_retrieval"));

        let results = retrieve_with_metrics(
            &retriever,
            &logger,
            &sample.query,
            top_k,
            |hit| matches_any(&hit.chunk.content, &answers),
            extra,
        )
        .await?;

        if find_best_rank(&results, &sample.answer_substrings).is_none() {
            misses.push(BenchmarkMiss {
                query: sample.query.clone(),
                expected: sample.answer_substrings.clone(),
                retrieved: results
                    .iter()
                    .map(|hit| hit.chunk.content.chars().take(MISS_PREVIEW_CHARS).collect())
                    .collect(),
            });
        }
    }

    let summary = logger.summary();
    if let Some(path) = &options.summary_output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    }

    Ok(BenchmarkReport {
        samples: samples.len(),
        corpus_files,
        chunk_count: index.len(),
        summary,
        misses,
    })
}

pub fn print_report(report: &BenchmarkReport, print_misses: bool) {
    let summary = &report.summary;
    println!("Retrieval benchmark");
    println!("===================");
    println!("  samples:        {}", report.samples);
    println!("  corpus files:   {}", report.corpus_files.len());
    println!("  chunks:         {}", report.chunk_count);
    println!("  queries:        {}", summary.total_queries);
    println!("  avg latency:    {:.3} ms", summary.avg_latency_ms);
    println!("  avg retrieved:  {:.2}", summary.avg_retrieved);
    for (k, rate) in &summary.topk_hit_rate.0 {
        println!("  top@{:<3} hit rate: {:.2}%", k, rate * 100.0);
    }
    if !summary.degradation_counts.is_empty() {
        println!("  degradations:");
        for (reason, count) in &summary.degradation_counts {
            println!("    - {}: {}", reason, count);
        }
    }

    if print_misses && !report.misses.is_empty() {
        println!();
        println!("Misses:");
        for miss in &report.misses {
            println!("  - {} (expected: {})", miss.query, miss.expected.join(" / "));
        }
    }

    println!();
    if report.misses.is_empty() {
        println!("All queries hit within top-k.");
    } else {
        println!("{} queries missed.", report.misses.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidex_core::models::DocumentChunk;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn chunk(content: &str) -> DocumentChunk {
        DocumentChunk {
            chunk_id: "c".to_string(),
            document_id: "d".to_string(),
            content: content.to_string(),
            source: "d.txt".to_string(),
            section_title: None,
            section_level: Some(1),
            page_number: None,
            start_char: 0,
            end_char: 0,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text(" 检索 增强\n生成 "), "检索增强生成");
    }

    #[test]
    fn test_find_best_rank_ignores_whitespace() {
        let a = chunk("unrelated text");
        let b = chunk("the pump\nstarts at 40 bar");
        let results: Vec<RetrievedChunk<'_>> = [&a, &b]
            .into_iter()
            .map(|c| RetrievedChunk {
                chunk: c,
                score: 1.0,
                dense_score: 0.0,
                bm25_score: 0.0,
            })
            .collect();

        assert_eq!(find_best_rank(&results, &["starts at 40".to_string()]), Some(2));
        assert_eq!(find_best_rank(&results, &["missing".to_string()]), None);
        assert_eq!(find_best_rank(&results, &["  ".to_string()]), None);
    }

    #[test]
    fn test_load_samples() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("samples.jsonl");
        std::fs::write(
            &path,
            "{\"query\": \"q1\", \"answer_substrings\": [\"a\"]}\n\n{\"query\": \"q2\", \"answer_substrings\": [], \"corpus_hint\": [\"x.md\"]}\n",
        )
        .unwrap();
        let samples = load_samples(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].corpus_hint.is_empty());
        assert_eq!(samples[1].corpus_hint, vec!["x.md".to_string()]);

        std::fs::write(&path, "\n\n").unwrap();
        assert!(load_samples(&path).is_err());
    }

    #[test]
    fn test_resolve_corpus_from_hints() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "# A").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        let sample = |hints: &[&str]| BenchmarkSample {
            query: "q".to_string(),
            answer_substrings: vec![],
            corpus_hint: hints.iter().map(|h| h.to_string()).collect(),
        };
        let samples = vec![sample(&["a.md", "b.txt"]), sample(&["a.md"])];

        let files = resolve_corpus_files(&[], &samples, tmp.path()).unwrap();
        assert_eq!(files, vec![tmp.path().join("a.md"), tmp.path().join("b.txt")]);

        let missing = vec![sample(&["nope.md"])];
        assert!(resolve_corpus_files(&[], &missing, tmp.path()).is_err());
        assert!(resolve_corpus_files(&[], &[sample(&[])], tmp.path()).is_err());
    }
}
