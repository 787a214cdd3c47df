//! Exact inner-product vector search.
//!
//! [`EmbeddingMatrix`] is a row-major `n × d` block of `f32`s, one row per
//! chunk. [`FlatIpIndex`] scans every row for each query, so results are
//! exact and deterministic. The binary layout produced by
//! [`FlatIpIndex::to_bytes`] is:
//!
//! ```text
//! magic "EVXFLTIP" | version u32 | dim u32 | count u64 | count·dim f32 (LE)
//! ```

use crate::embedding::{blob_to_vec, inner_product, vec_to_blob};
use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"EVXFLTIP";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8;

/// Row-major embedding matrix with a fixed, non-zero dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Validate provider output: exactly `expected_rows` rows, all with the
    /// same non-zero length.
    pub fn from_rows(rows: Vec<Vec<f32>>, expected_rows: usize) -> Result<Self> {
        if rows.len() != expected_rows {
            return Err(Error::EmbeddingShape {
                expected_rows,
                rows: rows.len(),
                detail: "row count does not match chunk count".to_string(),
            });
        }
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if dim == 0 {
            return Err(Error::EmbeddingShape {
                expected_rows,
                rows: rows.len(),
                detail: "embedding dimension is zero".to_string(),
            });
        }
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(Error::EmbeddingShape {
                expected_rows,
                rows: rows.len(),
                detail: format!("row {} has {} columns, expected {}", idx, row.len(), dim),
            });
        }

        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            data.extend(row);
        }
        Ok(Self {
            rows: expected_rows,
            dim,
            data,
        })
    }

    /// Wrap a flat buffer read back from disk.
    pub fn from_flat(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 || rows.checked_mul(dim) != Some(data.len()) {
            return Err(Error::IndexCorrupt(format!(
                "matrix buffer holds {} values, expected {} × {}",
                data.len(),
                rows,
                dim
            )));
        }
        Ok(Self { rows, dim, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.dim..(idx + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Bitwise equality, so NaN payloads and signed zeros must match too.
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.dim == other.dim
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Brute-force inner-product index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIpIndex {
    matrix: EmbeddingMatrix,
}

impl FlatIpIndex {
    pub fn new(matrix: EmbeddingMatrix) -> Self {
        Self { matrix }
    }

    pub fn len(&self) -> usize {
        self.matrix.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.rows() == 0
    }

    pub fn dim(&self) -> usize {
        self.matrix.dim()
    }

    pub fn matrix(&self) -> &EmbeddingMatrix {
        &self.matrix
    }

    /// Top-`k` rows by inner product with `query`, best first. Equal scores
    /// keep row order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dim() {
            return Err(Error::EmbeddingShape {
                expected_rows: 1,
                rows: 1,
                detail: format!(
                    "query vector has {} dimensions, index has {}",
                    query.len(),
                    self.dim()
                ),
            });
        }
        let mut hits: Vec<(usize, f32)> = (0..self.len())
            .map(|pos| (pos, inner_product(self.matrix.row(pos), query)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.matrix.as_slice().len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dim() as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(&vec_to_blob(self.matrix.as_slice()));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
            return Err(Error::IndexCorrupt("dense index has a bad header".to_string()));
        }
        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version != FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "unsupported dense index version {}",
                version
            )));
        }
        let dim = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[16..24]);
        let count = u64::from_le_bytes(count) as usize;

        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                Error::IndexCorrupt(format!(
                    "dense index shape {} × {} overflows",
                    count, dim
                ))
            })?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(Error::IndexCorrupt(format!(
                "dense index payload is {} bytes, expected {}",
                payload.len(),
                expected
            )));
        }
        let matrix = EmbeddingMatrix::from_flat(count, dim, blob_to_vec(payload))?;
        Ok(Self { matrix })
    }
}
