//! The in-memory searchable corpus.
//!
//! A [`ChunkIndex`] ties together the ordered chunk list, the embedding
//! matrix (inside a [`FlatIpIndex`]), the BM25 structure and the persisted
//! token lists. All four are aligned by position: row `i` of every
//! structure describes chunk `i`. An index is immutable once built;
//! re-indexing produces a new one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::bm25::Bm25Index;
use crate::dense::{EmbeddingMatrix, FlatIpIndex};
use crate::embedding::{EmbeddingModel, EncodeOptions};
use crate::error::{Error, Result};
use crate::models::DocumentChunk;
use crate::tokenize::Tokenizer;

/// Raw parts of an index, as produced by a build or read back from disk.
#[derive(Debug, Clone)]
pub struct IndexParts {
    pub chunks: Vec<DocumentChunk>,
    pub dense: FlatIpIndex,
    pub bm25_tokens: Vec<Vec<String>>,
    pub embedding_model_name: String,
    pub encode_options: EncodeOptions,
}

pub struct ChunkIndex {
    chunks: Vec<DocumentChunk>,
    dense: FlatIpIndex,
    bm25: Bm25Index,
    bm25_tokens: Vec<Vec<String>>,
    positions: HashMap<String, usize>,
    embedding_model_name: String,
    encode_options: EncodeOptions,
    embedder: Arc<dyn EmbeddingModel>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkIndex")
            .field("chunks", &self.chunks.len())
            .field("dim", &self.dense.dim())
            .field("embedding_model_name", &self.embedding_model_name)
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}

impl ChunkIndex {
    /// Encode, tokenize and index `chunks`.
    ///
    /// Fails with [`Error::CorpusEmpty`] for an empty list and with
    /// [`Error::EmbeddingShape`] unless the embedder returns one row of a
    /// consistent, non-zero width per chunk.
    pub async fn build(
        chunks: Vec<DocumentChunk>,
        embedder: Arc<dyn EmbeddingModel>,
        tokenizer: Arc<dyn Tokenizer>,
        options: &EncodeOptions,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::CorpusEmpty);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let rows = embedder.encode(&texts, options).await?;
        let matrix = EmbeddingMatrix::from_rows(rows, chunks.len())?;
        let bm25_tokens: Vec<Vec<String>> = texts.iter().map(|t| tokenizer.tokenize(t)).collect();

        tracing::debug!(
            chunks = chunks.len(),
            dim = matrix.dim(),
            model = embedder.model_name(),
            "encoded corpus"
        );

        let parts = IndexParts {
            chunks,
            dense: FlatIpIndex::new(matrix),
            bm25_tokens,
            embedding_model_name: embedder.model_name().to_string(),
            encode_options: options.clone(),
        };
        Self::from_parts(parts, embedder, tokenizer)
    }

    /// Assemble an index from aligned parts. BM25 is rebuilt from the token
    /// lists; the tokenizer is only kept for query time.
    pub fn from_parts(
        parts: IndexParts,
        embedder: Arc<dyn EmbeddingModel>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        let IndexParts {
            chunks,
            dense,
            bm25_tokens,
            embedding_model_name,
            encode_options,
        } = parts;

        if dense.len() != chunks.len() || bm25_tokens.len() != chunks.len() {
            return Err(Error::IndexCorrupt(format!(
                "misaligned index: {} chunks, {} embedding rows, {} token lists",
                chunks.len(),
                dense.len(),
                bm25_tokens.len()
            )));
        }

        let mut positions = HashMap::with_capacity(chunks.len());
        for (pos, chunk) in chunks.iter().enumerate() {
            if positions.insert(chunk.chunk_id.clone(), pos).is_some() {
                return Err(Error::IndexCorrupt(format!(
                    "duplicate chunk id {}",
                    chunk.chunk_id
                )));
            }
        }

        let bm25 = Bm25Index::new(&bm25_tokens);
        Ok(Self {
            chunks,
            dense,
            bm25,
            bm25_tokens,
            positions,
            embedding_model_name,
            encode_options,
            embedder,
            tokenizer,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    pub fn chunk(&self, pos: usize) -> Option<&DocumentChunk> {
        self.chunks.get(pos)
    }

    pub fn chunk_by_id(&self, chunk_id: &str) -> Option<&DocumentChunk> {
        self.positions.get(chunk_id).map(|&pos| &self.chunks[pos])
    }

    pub fn position_of(&self, chunk_id: &str) -> Option<usize> {
        self.positions.get(chunk_id).copied()
    }

    pub fn dense(&self) -> &FlatIpIndex {
        &self.dense
    }

    pub fn embeddings(&self) -> &EmbeddingMatrix {
        self.dense.matrix()
    }

    pub fn dim(&self) -> usize {
        self.dense.dim()
    }

    pub fn bm25(&self) -> &Bm25Index {
        &self.bm25
    }

    pub fn bm25_tokens(&self) -> &[Vec<String>] {
        &self.bm25_tokens
    }

    pub fn embedding_model_name(&self) -> &str {
        &self.embedding_model_name
    }

    pub fn encode_options(&self) -> &EncodeOptions {
        &self.encode_options
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn embedder(&self) -> &dyn EmbeddingModel {
        self.embedder.as_ref()
    }

    /// Encode one query string with the build-time normalization policy.
    pub async fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        let options = self.encode_options.for_query();
        let mut rows = self
            .embedder
            .encode(&[text.to_string()], &options)
            .await?;
        if rows.len() != 1 {
            return Err(Error::EmbeddingShape {
                expected_rows: 1,
                rows: rows.len(),
                detail: "query encoding must return exactly one row".to_string(),
            });
        }
        let vector = rows.remove(0);
        if vector.len() != self.dim() {
            return Err(Error::EmbeddingShape {
                expected_rows: 1,
                rows: 1,
                detail: format!(
                    "query vector has {} dimensions, index has {}",
                    vector.len(),
                    self.dim()
                ),
            });
        }
        Ok(vector)
    }

    pub fn corpus_fingerprint(&self) -> String {
        corpus_fingerprint(&self.chunks)
    }
}

/// SHA-256 over ordered chunk ids and contents, hex encoded.
pub fn corpus_fingerprint(chunks: &[DocumentChunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.chunk_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.content.as_bytes());
        hasher.update([b'\n']);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
