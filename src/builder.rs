//! Index construction: load → chunk → embed → index, plus cache reuse.
//!
//! [`IndexBuilder`] owns the collaborators (embedder, tokenizer) and the
//! chunking/encoding parameters. It produces a [`ChunkIndex`] from files or
//! already-loaded documents, and [`IndexBuilder::build_or_load`] skips the
//! embedding step when the cache directory already holds an index of the
//! same corpus built by the same model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use evidex_core::chunk::{chunk_documents, ChunkingParams};
use evidex_core::embedding::{EmbeddingModel, EncodeOptions};
use evidex_core::index::{corpus_fingerprint, ChunkIndex};
use evidex_core::models::{DocumentChunk, LoadedDocument};
use evidex_core::tokenize::{MixedScriptTokenizer, Tokenizer};
use evidex_core::{Error, Result};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::loader::load_documents;
use crate::persist::{load_index, read_metadata, save_index};

/// Whether [`IndexBuilder::build_or_load`] reused the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    Reused,
}

pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingModel>,
    tokenizer: Arc<dyn Tokenizer>,
    chunking: ChunkingParams,
    encode: EncodeOptions,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            embedder,
            tokenizer,
            chunking: ChunkingParams::default(),
            encode: EncodeOptions::default(),
        }
    }

    /// Builder wired from configuration: the configured embedding provider,
    /// the default tokenizer, and the `[chunking]`/`[embedding]` settings.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(embedder, Arc::new(MixedScriptTokenizer::new()))
            .with_chunking(config.chunking.params())
            .with_encode_options(config.embedding.encode_options()))
    }

    pub fn with_chunking(mut self, chunking: ChunkingParams) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_encode_options(mut self, encode: EncodeOptions) -> Self {
        self.encode = encode;
        self
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingModel> {
        Arc::clone(&self.embedder)
    }

    pub fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    pub fn chunking(&self) -> &ChunkingParams {
        &self.chunking
    }

    /// Load and chunk `paths` without embedding anything.
    pub fn chunk_files(&self, paths: &[PathBuf]) -> Result<Vec<DocumentChunk>> {
        let documents = load_documents(paths)?;
        Ok(chunk_documents(&documents, &self.chunking))
    }

    #[tracing::instrument(skip_all, fields(files = paths.len()))]
    pub async fn build_from_files(&self, paths: &[PathBuf]) -> Result<ChunkIndex> {
        let documents = load_documents(paths)?;
        self.build_from_documents(&documents).await
    }

    pub async fn build_from_documents(&self, documents: &[LoadedDocument]) -> Result<ChunkIndex> {
        let chunks = chunk_documents(documents, &self.chunking);
        tracing::info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "chunked corpus"
        );
        self.build_from_chunks(chunks).await
    }

    /// Embed and index already-produced chunks, honouring the encode
    /// timeout.
    pub async fn build_from_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<ChunkIndex> {
        let build = ChunkIndex::build(
            chunks,
            Arc::clone(&self.embedder),
            Arc::clone(&self.tokenizer),
            &self.encode,
        );
        let index = match self.encode.timeout {
            Some(limit) => tokio::time::timeout(limit, build)
                .await
                .map_err(|_| Error::DeadlineExceeded(limit))??,
            None => build.await?,
        };
        tracing::info!(
            chunks = index.len(),
            dim = index.dim(),
            model = index.embedding_model_name(),
            "built index"
        );
        Ok(index)
    }

    /// Reuse the index in `dir` when it was built from the same chunks by
    /// the same model; otherwise build from `paths` and save to `dir`.
    #[tracing::instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn build_or_load(
        &self,
        paths: &[PathBuf],
        dir: &Path,
    ) -> Result<(ChunkIndex, BuildOutcome)> {
        let chunks = self.chunk_files(paths)?;

        match read_metadata(dir) {
            Ok(metadata)
                if metadata.corpus_fingerprint == corpus_fingerprint(&chunks)
                    && metadata.embedding_model_name == self.embedder.model_name() =>
            {
                match load_index(dir, self.embedder(), self.tokenizer()) {
                    Ok(index) => {
                        tracing::info!(chunks = index.len(), "reusing cached index");
                        return Ok((index, BuildOutcome::Reused));
                    }
                    Err(e) => tracing::warn!(error = %e, "cached index unreadable; rebuilding"),
                }
            }
            Ok(_) => tracing::info!("corpus or model changed; rebuilding index"),
            Err(Error::IndexNotFound { .. }) => {}
            Err(e) => tracing::warn!(error = %e, "cached metadata unreadable; rebuilding"),
        }

        let index = self.build_from_chunks(chunks).await?;
        save_index(&index, dir)?;
        Ok((index, BuildOutcome::Built))
    }
}
