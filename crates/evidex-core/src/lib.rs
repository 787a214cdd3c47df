//! # evidex core
//!
//! Pure indexing and retrieval logic for evidex: the document/chunk data
//! model, the sentence-aware chunker, the embedding and tokenizer traits,
//! BM25, exact inner-product search and hybrid score fusion.
//!
//! This crate performs no filesystem or network I/O and does not depend on
//! tokio. Loading files, persisting indexes and talking to embedding
//! services live in the `evidex` crate.

pub mod bm25;
pub mod chunk;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod search;
pub mod tokenize;

pub use error::{Error, Result};
