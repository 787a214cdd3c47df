//! A swappable handle to the live index.
//!
//! Readers take an `Arc` snapshot and search it without holding the lock;
//! a rebuild installs its result with [`SharedIndex::swap`]. In-flight
//! searches keep the snapshot they started with.

use std::sync::{Arc, RwLock};

use evidex_core::index::ChunkIndex;

#[derive(Debug)]
pub struct SharedIndex {
    current: RwLock<Arc<ChunkIndex>>,
}

impl SharedIndex {
    pub fn new(index: ChunkIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<ChunkIndex> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install `index`, returning the one it replaced.
    pub fn swap(&self, index: ChunkIndex) -> Arc<ChunkIndex> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let previous = std::mem::replace(&mut *guard, Arc::new(index));
        tracing::info!(
            previous = previous.len(),
            current = guard.len(),
            "swapped live index"
        );
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidex_core::embedding::{EncodeOptions, HashingEmbedder};
    use evidex_core::models::DocumentChunk;
    use evidex_core::tokenize::MixedScriptTokenizer;
    use std::collections::BTreeMap;

    async fn index_of(texts: &[&str]) -> ChunkIndex {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| DocumentChunk {
                chunk_id: format!("doc_chunk_{:04}", i),
                document_id: "doc".to_string(),
                content: text.to_string(),
                source: "doc.txt".to_string(),
                section_title: None,
                section_level: Some(1),
                page_number: None,
                start_char: 0,
                end_char: text.chars().count(),
                metadata: BTreeMap::new(),
            })
            .collect();
        ChunkIndex::build(
            chunks,
            Arc::new(HashingEmbedder::new(8)),
            Arc::new(MixedScriptTokenizer::new()),
            &EncodeOptions::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_survives_swap() {
        let shared = SharedIndex::new(index_of(&["one"]).await);
        let before = shared.snapshot();

        let previous = shared.swap(index_of(&["one", "two"]).await);
        assert_eq!(previous.len(), 1);
        assert_eq!(before.len(), 1);
        assert_eq!(shared.snapshot().len(), 2);
    }
}
