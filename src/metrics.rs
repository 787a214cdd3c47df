//! Retrieval telemetry.
//!
//! Every query is appended to a JSON Lines log and folded into running
//! aggregates:
//!
//! - `total_queries`, cumulative latency and retrieved counts
//! - per-threshold Top-K hits (`best_rank <= k`)
//! - degradation counts by [`DegradationReason`]
//!
//! Aggregates live in memory for the logger's lifetime. With
//! `metrics.replay_on_start` the existing log is replayed on open, so a
//! fresh process reports the same summary the previous one did.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use evidex_core::Result;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::MetricsConfig;

/// Why a retrieval underperformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationReason {
    EmptyResult,
    RerankTimeout,
    FallbackOutline,
    ManualOverride,
}

impl DegradationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationReason::EmptyResult => "empty_result",
            DegradationReason::RerankTimeout => "rerank_timeout",
            DegradationReason::FallbackOutline => "fallback_outline",
            DegradationReason::ManualOverride => "manual_override",
        }
    }
}

impl std::fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query as reported by the caller.
#[derive(Debug, Clone, Default)]
pub struct QueryEvent {
    pub query: String,
    pub latency_ms: f64,
    pub retrieved: usize,
    pub top_k: usize,
    pub total_chunks: usize,
    /// 1-based rank of the first relevant result.
    pub best_rank: Option<usize>,
    pub degradation: Option<DegradationReason>,
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One line of the metrics log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub latency_ms: f64,
    pub retrieved: usize,
    pub top_k: usize,
    pub total_chunks: usize,
    pub best_rank: Option<usize>,
    /// Recomputed from `best_rank` on replay.
    #[serde(default, skip_deserializing)]
    pub topk_hits: TopKHits,
    pub degradation: Option<DegradationReason>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `{"top@k": hit}` in ascending `k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopKHits(pub Vec<(usize, bool)>);

impl TopKHits {
    fn compute(best_rank: Option<usize>, thresholds: &[usize]) -> Self {
        Self(
            thresholds
                .iter()
                .map(|&k| (k, best_rank.is_some_and(|rank| rank <= k)))
                .collect(),
        )
    }
}

impl Serialize for TopKHits {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, hit) in &self.0 {
            map.serialize_entry(&format!("top@{}", k), hit)?;
        }
        map.end()
    }
}

/// `{"top@k": rate}` in ascending `k`, rates rounded to 4 places.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopKRates(pub Vec<(usize, f64)>);

impl TopKRates {
    pub fn get(&self, k: usize) -> Option<f64> {
        self.0.iter().find(|(t, _)| *t == k).map(|(_, rate)| *rate)
    }
}

impl Serialize for TopKRates {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, rate)| (format!("top@{}", k), rate)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_queries: u64,
    pub avg_latency_ms: f64,
    pub avg_retrieved: f64,
    pub last_chunk_count: usize,
    pub topk_hit_rate: TopKRates,
    pub degradation_counts: BTreeMap<String, u64>,
}

/// Process-lifetime counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalRunStats {
    pub total_queries: u64,
    pub total_latency_ms: f64,
    pub total_retrieved: u64,
    pub last_chunk_count: usize,
    pub topk_hits: BTreeMap<usize, u64>,
    pub degradation_counts: BTreeMap<DegradationReason, u64>,
}

impl RetrievalRunStats {
    pub fn with_thresholds(thresholds: &[usize]) -> Self {
        let mut stats = Self::default();
        for &k in thresholds {
            stats.topk_hits.entry(k).or_insert(0);
        }
        stats
    }

    pub fn hit_rate(&self, k: usize) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.topk_hits.get(&k).copied().unwrap_or(0) as f64 / self.total_queries as f64
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.total_latency_ms / self.total_queries as f64
    }

    pub fn average_retrieved(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.total_retrieved as f64 / self.total_queries as f64
    }

    fn apply(&mut self, record: &LogRecord) {
        self.total_queries += 1;
        self.total_latency_ms += record.latency_ms;
        self.total_retrieved += record.retrieved as u64;
        self.last_chunk_count = record.total_chunks;

        if let Some(rank) = record.best_rank {
            for (&k, hits) in self.topk_hits.iter_mut() {
                if rank <= k {
                    *hits += 1;
                }
            }
        }
        if let Some(reason) = record.degradation {
            *self.degradation_counts.entry(reason).or_insert(0) += 1;
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_queries: self.total_queries,
            avg_latency_ms: round_to(self.average_latency_ms(), 3),
            avg_retrieved: round_to(self.average_retrieved(), 3),
            last_chunk_count: self.last_chunk_count,
            topk_hit_rate: TopKRates(
                self.topk_hits
                    .keys()
                    .map(|&k| (k, round_to(self.hit_rate(k), 4)))
                    .collect(),
            ),
            degradation_counts: self
                .degradation_counts
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn normalize_thresholds(thresholds: &[usize]) -> Vec<usize> {
    let mut out: Vec<usize> = thresholds.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

struct LoggerState {
    file: File,
    stats: RetrievalRunStats,
}

/// Appends query records to a JSON Lines file and keeps aggregates.
pub struct MetricsLogger {
    path: PathBuf,
    thresholds: Vec<usize>,
    state: Mutex<LoggerState>,
}

impl MetricsLogger {
    pub fn open(config: &MetricsConfig) -> Result<Self> {
        Self::open_at(
            &config.log_path,
            &config.top_k_thresholds,
            config.replay_on_start,
        )
    }

    pub fn open_at(path: &Path, thresholds: &[usize], replay: bool) -> Result<Self> {
        let thresholds = normalize_thresholds(thresholds);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let stats = if replay {
            replay_log(path, &thresholds)?
        } else {
            RetrievalRunStats::with_thresholds(&thresholds)
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            thresholds,
            state: Mutex::new(LoggerState { file, stats }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn thresholds(&self) -> &[usize] {
        &self.thresholds
    }

    /// Append one record and update the aggregates.
    pub fn record(&self, event: QueryEvent) -> Result<LogRecord> {
        let record = LogRecord {
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            query: event.query,
            latency_ms: round_to(event.latency_ms, 3),
            retrieved: event.retrieved,
            top_k: event.top_k,
            total_chunks: event.total_chunks,
            best_rank: event.best_rank,
            topk_hits: TopKHits::compute(event.best_rank, &self.thresholds),
            degradation: event.degradation,
            extra: event.extra,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.file.write_all(&line)?;
        // aggregates use the unrounded latency
        let mut exact = record.clone();
        exact.latency_ms = event.latency_ms;
        state.stats.apply(&exact);
        Ok(record)
    }

    pub fn stats(&self) -> RetrievalRunStats {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stats
            .clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stats
            .summary()
    }
}

/// Fold an existing log into fresh aggregates. A missing file yields empty
/// stats; malformed lines are skipped.
pub fn replay_log(path: &Path, thresholds: &[usize]) -> Result<RetrievalRunStats> {
    let mut stats = RetrievalRunStats::with_thresholds(&normalize_thresholds(thresholds));
    if !path.exists() {
        return Ok(stats);
    }

    let content = std::fs::read_to_string(path)?;
    let mut skipped = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) => stats.apply(&record),
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = lineno + 1, error = %e, "skipping malformed metrics record");
            }
        }
    }
    tracing::debug!(
        queries = stats.total_queries,
        skipped,
        path = %path.display(),
        "replayed metrics log"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(query: &str, best_rank: Option<usize>) -> QueryEvent {
        QueryEvent {
            query: query.to_string(),
            latency_ms: 12.3456,
            retrieved: if best_rank.is_some() { 5 } else { 0 },
            top_k: 5,
            total_chunks: 40,
            best_rank,
            ..QueryEvent::default()
        }
    }

    #[test]
    fn test_hit_rates_and_degradation() {
        let tmp = TempDir::new().unwrap();
        let logger = MetricsLogger::open_at(&tmp.path().join("m.jsonl"), &[1, 3, 5], false).unwrap();

        logger.record(event("found", Some(2))).unwrap();
        logger
            .record(QueryEvent {
                degradation: Some(DegradationReason::EmptyResult),
                ..event("missing", None)
            })
            .unwrap();

        let summary = logger.summary();
        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.topk_hit_rate.get(1), Some(0.0));
        assert_eq!(summary.topk_hit_rate.get(3), Some(0.5));
        assert_eq!(summary.topk_hit_rate.get(5), Some(0.5));
        assert_eq!(summary.degradation_counts.get("empty_result"), Some(&1));
        assert_eq!(summary.avg_retrieved, 2.5);
        assert_eq!(summary.last_chunk_count, 40);
    }

    #[test]
    fn test_record_line_shape() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("m.jsonl");
        let logger = MetricsLogger::open_at(&path, &[5, 1, 3, 3], false).unwrap();
        assert_eq!(logger.thresholds(), &[1, 3, 5]);

        let mut extra = serde_json::Map::new();
        extra.insert("mode".to_string(), serde_json::json!("test"));
        logger
            .record(QueryEvent {
                extra,
                ..event("发动机 维护", Some(3))
            })
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["query"], "发动机 维护");
        assert_eq!(value["latency_ms"], 12.346);
        assert_eq!(value["best_rank"], 3);
        assert_eq!(value["degradation"], serde_json::Value::Null);
        assert_eq!(value["extra"]["mode"], "test");
        assert_eq!(
            value["topk_hits"],
            serde_json::json!({"top@1": false, "top@3": true, "top@5": true})
        );
        assert!(line.find("top@1").unwrap() < line.find("top@3").unwrap());
    }

    #[test]
    fn test_summary_orders_thresholds_numerically() {
        let stats = RetrievalRunStats::with_thresholds(&[10, 5, 1]);
        let json = serde_json::to_string(&stats.summary()).unwrap();
        let one = json.find("top@1\"").unwrap();
        let five = json.find("top@5\"").unwrap();
        let ten = json.find("top@10\"").unwrap();
        assert!(one < five && five < ten);
        assert!(json.contains("\"avg_latency_ms\":0.0"));
    }

    #[test]
    fn test_replay_reproduces_aggregates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("m.jsonl");
        let first = MetricsLogger::open_at(&path, &[1, 3, 5], false).unwrap();
        first.record(event("a", Some(1))).unwrap();
        first.record(event("b", Some(4))).unwrap();
        first
            .record(QueryEvent {
                degradation: Some(DegradationReason::RerankTimeout),
                ..event("c", None)
            })
            .unwrap();
        let expected = first.summary();
        drop(first);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json\n\n").unwrap();

        let second = MetricsLogger::open_at(&path, &[1, 3, 5], true).unwrap();
        let replayed = second.summary();
        assert_eq!(replayed.total_queries, 3);
        assert_eq!(replayed.topk_hit_rate, expected.topk_hit_rate);
        assert_eq!(replayed.degradation_counts, expected.degradation_counts);
        assert_eq!(replayed.avg_retrieved, expected.avg_retrieved);
    }

    #[test]
    fn test_replay_missing_log_is_empty() {
        let tmp = TempDir::new().unwrap();
        let stats = replay_log(&tmp.path().join("none.jsonl"), &[1]).unwrap();
        assert_eq!(stats.total_queries, 0);
        assert_eq!(stats.hit_rate(1), 0.0);
    }

    #[test]
    fn test_degradation_reason_serde() {
        let json = serde_json::to_string(&DegradationReason::FallbackOutline).unwrap();
        assert_eq!(json, "\"fallback_outline\"");
        let back: DegradationReason = serde_json::from_str("\"manual_override\"").unwrap();
        assert_eq!(back, DegradationReason::ManualOverride);
        assert_eq!(back.to_string(), "manual_override");
    }
}
