//! Document and chunk data model.
//!
//! These types flow from the loaders through the chunker into the index.
//! Offsets are counted in `char`s (Unicode scalar values), never bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Document-level metadata, fixed once a file has been loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Stable identifier, normally the file stem.
    pub document_id: String,
    pub source_path: String,
    pub media_type: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// A structural section of a document (heading block, page, or whole text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub section_id: String,
    pub title: Option<String>,
    /// Heading depth; 1 for untitled and page sections.
    pub level: u32,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub page_number: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DocumentSection {
    /// Blank sections are valid while loading but never reach the chunker.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A parsed source file. Produced once per file and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedDocument {
    pub metadata: DocumentMetadata,
    pub sections: Vec<DocumentSection>,
    pub full_text: String,
}

impl LoadedDocument {
    pub fn non_empty_sections(&self) -> impl Iterator<Item = &DocumentSection> {
        self.sections.iter().filter(|section| !section.is_empty())
    }
}

/// A bounded span of document text with provenance, the unit of retrieval.
///
/// `metadata` is a private copy of the originating section's metadata;
/// changing it never reaches back into the section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `{document_id}_chunk_{seq:04}`, numbered across the whole document.
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub source: String,
    pub section_title: Option<String>,
    pub section_level: Option<u32>,
    pub page_number: Option<u32>,
    /// Absolute offset of the first sentence in the document's full text.
    pub start_char: usize,
    /// Absolute offset one past the last sentence.
    pub end_char: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DocumentChunk {
    /// Content length in characters.
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
