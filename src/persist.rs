//! On-disk index format.
//!
//! An index directory holds five artifacts:
//!
//! | File | Contents |
//! |------|----------|
//! | `dense.index` | flat inner-product index (magic, version, dim, count, LE `f32` rows) |
//! | `embeddings.npy` | the same matrix as a NumPy v1.0 `<f4` C-order array |
//! | `chunks.json` | array of chunk records |
//! | `bm25_tokens.json` | array of token arrays, aligned with the chunks |
//! | `metadata.json` | [`IndexMetadata`] |
//!
//! Saves write into a sibling staging directory that is renamed into place
//! once every file is on disk. Loads read every artifact back verbatim and
//! cross-check counts and dimensions; BM25 is rebuilt from the saved token
//! lists, never by tokenizing again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evidex_core::dense::{EmbeddingMatrix, FlatIpIndex};
use evidex_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingModel, EncodeOptions};
use evidex_core::index::{ChunkIndex, IndexParts};
use evidex_core::models::DocumentChunk;
use evidex_core::tokenize::Tokenizer;
use evidex_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DENSE_INDEX_FILE: &str = "dense.index";
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const TOKENS_FILE: &str = "bm25_tokens.json";
pub const METADATA_FILE: &str = "metadata.json";

const REQUIRED_FILES: [&str; 5] = [
    DENSE_INDEX_FILE,
    EMBEDDINGS_FILE,
    CHUNKS_FILE,
    TOKENS_FILE,
    METADATA_FILE,
];

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model_name: String,
    pub chunk_count: usize,
    pub embedding_dim: usize,
    #[serde(default = "default_normalize")]
    pub normalize_embeddings: bool,
    #[serde(default)]
    pub tokenizer: String,
    #[serde(default)]
    pub corpus_fingerprint: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_normalize() -> bool {
    true
}

impl IndexMetadata {
    pub fn describe(index: &ChunkIndex) -> Self {
        Self {
            embedding_model_name: index.embedding_model_name().to_string(),
            chunk_count: index.len(),
            embedding_dim: index.dim(),
            normalize_embeddings: index.encode_options().normalize,
            tokenizer: index.tokenizer().name().to_string(),
            corpus_fingerprint: index.corpus_fingerprint(),
            created_at: Some(Utc::now()),
        }
    }
}

/// Persist `index` into `dir`, replacing whatever was there.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn save_index(index: &ChunkIndex, dir: &Path) -> Result<IndexMetadata> {
    let metadata = IndexMetadata::describe(index);
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let staging = parent.join(format!(".{}.staging-{}", name, uuid::Uuid::new_v4()));

    if let Err(e) = write_artifacts(index, &metadata, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if dir.exists() {
        let backup = parent.join(format!(".{}.old-{}", name, uuid::Uuid::new_v4()));
        fs::rename(dir, &backup)?;
        if let Err(e) = fs::rename(&staging, dir) {
            let _ = fs::rename(&backup, dir);
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        discard_backup(&backup);
    } else {
        fs::rename(&staging, dir)?;
    }

    tracing::info!(
        chunks = metadata.chunk_count,
        dim = metadata.embedding_dim,
        "saved index"
    );
    Ok(metadata)
}

fn write_artifacts(index: &ChunkIndex, metadata: &IndexMetadata, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(DENSE_INDEX_FILE), index.dense().to_bytes())?;
    fs::write(dir.join(EMBEDDINGS_FILE), encode_npy(index.embeddings()))?;
    fs::write(
        dir.join(CHUNKS_FILE),
        serde_json::to_vec_pretty(index.chunks())?,
    )?;
    fs::write(dir.join(TOKENS_FILE), serde_json::to_vec(index.bm25_tokens())?)?;
    fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(metadata)?)?;
    Ok(())
}

/// Read `metadata.json` only.
pub fn read_metadata(dir: &Path) -> Result<IndexMetadata> {
    let path = require(dir, METADATA_FILE)?;
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn require(dir: &Path, file: &str) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(Error::IndexNotFound {
            path: dir.to_path_buf(),
            missing: "index directory".to_string(),
        });
    }
    let path = dir.join(file);
    if !path.is_file() {
        return Err(Error::IndexNotFound {
            path: dir.to_path_buf(),
            missing: file.to_string(),
        });
    }
    Ok(path)
}

/// Load an index saved by [`save_index`], attaching the query-time
/// collaborators.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_index(
    dir: &Path,
    embedder: Arc<dyn EmbeddingModel>,
    tokenizer: Arc<dyn Tokenizer>,
) -> Result<ChunkIndex> {
    for file in REQUIRED_FILES {
        require(dir, file)?;
    }

    let metadata = read_metadata(dir)?;
    let dense = FlatIpIndex::from_bytes(&fs::read(dir.join(DENSE_INDEX_FILE))?)?;
    let matrix = decode_npy(&fs::read(dir.join(EMBEDDINGS_FILE))?)?;
    let chunks: Vec<DocumentChunk> = serde_json::from_slice(&fs::read(dir.join(CHUNKS_FILE))?)?;
    let bm25_tokens: Vec<Vec<String>> =
        serde_json::from_slice(&fs::read(dir.join(TOKENS_FILE))?)?;

    if !matrix.bitwise_eq(dense.matrix()) {
        return Err(Error::IndexCorrupt(format!(
            "{} and {} disagree",
            DENSE_INDEX_FILE, EMBEDDINGS_FILE
        )));
    }
    if metadata.chunk_count != chunks.len() || metadata.embedding_dim != dense.dim() {
        return Err(Error::IndexCorrupt(format!(
            "metadata records {} chunks of dim {}, artifacts hold {} chunks of dim {}",
            metadata.chunk_count,
            metadata.embedding_dim,
            chunks.len(),
            dense.dim()
        )));
    }

    if !metadata.tokenizer.is_empty() && metadata.tokenizer != tokenizer.name() {
        tracing::warn!(
            saved = %metadata.tokenizer,
            current = tokenizer.name(),
            "tokenizer differs from the one used to build the index; lexical scores may drift"
        );
    }
    if metadata.embedding_model_name != embedder.model_name() {
        tracing::warn!(
            saved = %metadata.embedding_model_name,
            current = embedder.model_name(),
            "embedding model differs from the one used to build the index"
        );
    }

    let parts = IndexParts {
        chunks,
        dense,
        bm25_tokens,
        embedding_model_name: metadata.embedding_model_name.clone(),
        encode_options: EncodeOptions {
            normalize: metadata.normalize_embeddings,
            ..EncodeOptions::default()
        },
    };
    let index = ChunkIndex::from_parts(parts, embedder, tokenizer)?;
    tracing::info!(chunks = index.len(), dim = index.dim(), "loaded index");
    Ok(index)
}

/// Serialize a matrix as a NumPy `.npy` v1.0 file (`<f4`, C order).
pub fn encode_npy(matrix: &EmbeddingMatrix) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.rows(),
        matrix.dim()
    );
    // magic(6) + version(2) + header_len(2) + header must be a multiple of 64
    let unpadded = 10 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + matrix.as_slice().len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&vec_to_blob(matrix.as_slice()));
    out
}

/// The new index is already live; a stale backup only costs disk space.
fn discard_backup(backup: &Path) {
    if let Err(e) = fs::remove_dir_all(backup) {
        tracing::warn!(
            backup = %backup.display(),
            error = %e,
            "failed to remove previous index"
        );
    }
}

/// Parse a 2-D `<f4` C-order `.npy` file.
pub fn decode_npy(bytes: &[u8]) -> Result<EmbeddingMatrix> {
    let corrupt = |msg: &str| Error::IndexCorrupt(format!("{}: {}", EMBEDDINGS_FILE, msg));

    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        _ => return Err(corrupt("unsupported version")),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(corrupt("truncated header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| corrupt("header is not UTF-8"))?;

    if !header.contains("'descr': '<f4'") {
        return Err(corrupt("dtype must be little-endian float32"));
    }
    if header.contains("'fortran_order': True") {
        return Err(corrupt("fortran order is not supported"));
    }
    let shape = header
        .split("'shape': (")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .ok_or_else(|| corrupt("missing shape"))?;
    let dims: Vec<usize> = shape
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| corrupt("bad shape")))
        .collect::<Result<_>>()?;
    let (rows, dim) = match dims.as_slice() {
        [rows, dim] => (*rows, *dim),
        _ => return Err(corrupt("expected a 2-D array")),
    };

    let expected = rows
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt("shape overflows"))?;
    let payload = &bytes[data_start..];
    if payload.len() != expected {
        return Err(corrupt("payload size does not match shape"));
    }
    EmbeddingMatrix::from_flat(rows, dim, blob_to_vec(payload))
}
