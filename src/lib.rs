//! # evidex
//!
//! Document indexing and hybrid retrieval. Text, Markdown, PDF and DOCX
//! files are split into provenance-tagged chunks, embedded, and indexed
//! twice: an exact inner-product index for dense search and BM25 for
//! lexical search. Queries are answered by fusing both rankings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐   ┌────────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ IndexBuilder │──▶│   ChunkIndex   │
//! │ txt/md/  │   │         │   │ embed + BM25 │   │ dense + BM25   │
//! │ pdf/docx │   └─────────┘   └──────┬───────┘   └───────┬────────┘
//! └──────────┘                        │                   ▼
//!                               ┌─────┴─────┐     ┌────────────────┐
//!                               │  persist  │     │HybridRetriever │──▶ MetricsLogger
//!                               └───────────┘     └────────────────┘
//! ```
//!
//! The algorithms live in [`evidex_core`] (re-exported here); this
//! crate adds file formats, providers, persistence, telemetry and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | PDF page and DOCX paragraph extraction |
//! | [`loader`] | Per-format loaders and path collection |
//! | [`embedding`] | Embedding providers (hash, OpenAI, Ollama, fastembed) |
//! | [`builder`] | Load → chunk → embed → index, with cache reuse |
//! | [`persist`] | Index save/load |
//! | [`shared`] | Swappable live-index handle |
//! | [`metrics`] | JSONL query log and aggregates |
//! | [`evidence`] | Retrieval with metrics, evidence packaging |
//! | [`bench`] | Retrieval benchmark harness |
//! | [`ingest`], [`search`], [`stats`] | CLI command bodies |

pub use evidex_core;

pub mod bench;
pub mod builder;
pub mod config;
pub mod embedding;
pub mod evidence;
pub mod extract;
pub mod ingest;
pub mod loader;
pub mod metrics;
pub mod persist;
pub mod search;
pub mod shared;
pub mod stats;
