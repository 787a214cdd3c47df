//! Embedding collaborator abstraction and vector helpers.
//!
//! The index never talks to a model directly. Callers inject an
//! [`EmbeddingModel`], and the index asks it to encode chunk texts at build
//! time and query strings at search time. [`HashingEmbedder`] is a
//! deterministic, dependency-free implementation used offline and in tests.
//!
//! Vectors are stored as little-endian `f32` byte blobs on disk; see
//! [`vec_to_blob`] / [`blob_to_vec`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Per-call encoding options.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    /// Maximum texts per provider request.
    pub batch_size: usize,
    /// L2-normalize every returned row.
    pub normalize: bool,
    /// Deadline for a single provider call.
    pub timeout: Option<Duration>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            normalize: true,
            timeout: None,
        }
    }
}

impl EncodeOptions {
    /// Options for encoding a single query with the same normalization policy.
    pub fn for_query(&self) -> Self {
        Self {
            batch_size: 1,
            ..self.clone()
        }
    }
}

/// A text embedding model.
///
/// Implementations must be deterministic for a fixed model and must return
/// exactly one row per input text.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Identifier recorded in the persisted index metadata.
    fn model_name(&self) -> &str;

    async fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<Vec<Vec<f32>>>;
}

/// Character-bucket embedder: each char adds 1.0 to bucket `codepoint % dim`.
///
/// Texts that share characters get similar vectors, which is enough to
/// exercise ranking without a real model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    name: String,
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            name: format!("hash-{}", dim),
            dim: dim.max(1),
        }
    }

    pub fn with_name(dim: usize, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dim: dim.max(1),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn embed_one(&self, text: &str, normalize: bool) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for ch in text.chars() {
            vec[(ch as usize) % self.dim] += 1.0;
        }
        if normalize {
            l2_normalize(&mut vec);
        }
        vec
    }
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| self.embed_one(text, options.normalize))
            .collect())
    }
}

/// Scale `vec` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as a little-endian byte blob.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for &val in vec {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Decode a little-endian byte blob. Trailing bytes that do not form a full
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
