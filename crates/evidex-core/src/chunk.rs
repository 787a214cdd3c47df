//! Sentence-aware text chunker.
//!
//! Splits the non-empty sections of a [`LoadedDocument`] into bounded,
//! overlapping [`DocumentChunk`]s that remember where they came from.
//!
//! # Algorithm
//!
//! 1. Scan section text, skipping leading whitespace, and close a sentence
//!    at any of `。！？!?；;` or a newline. Each sentence is trimmed and keeps
//!    its exact character offsets within the section.
//! 2. A sentence longer than `chunk_size` is cut into `chunk_size` windows
//!    that overlap by [`FALLBACK_OVERLAP_CHARS`] (at most half a window).
//! 3. Sentences are appended to a buffer. When the next sentence would
//!    overflow it, the buffer is flushed as one chunk and its last
//!    `sentence_overlap` sentences seed the next buffer. Seed sentences that
//!    would still overflow together with the incoming one are dropped from
//!    the front, so no chunk is longer than `chunk_size`.
//! 4. Chunk ids `{document_id}_chunk_{seq:04}` count across every section
//!    of one document.
//!
//! All lengths and offsets are in characters.

use serde::{Deserialize, Serialize};

use crate::models::{DocumentChunk, DocumentSection, LoadedDocument};

pub const DEFAULT_CHUNK_SIZE: usize = 280;
pub const DEFAULT_SENTENCE_OVERLAP: usize = 1;
pub const FALLBACK_OVERLAP_CHARS: usize = 40;
pub const MIN_CHUNK_SIZE: usize = 80;
pub const MAX_CHUNK_SIZE: usize = 800;
pub const MAX_SENTENCE_OVERLAP: usize = 3;

const SENTENCE_DELIMITERS: [char; 8] = ['。', '！', '？', '!', '?', '；', ';', '\n'];

/// Chunk sizing parameters. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub sentence_overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sentence_overlap: DEFAULT_SENTENCE_OVERLAP,
        }
    }
}

impl ChunkingParams {
    pub fn new(chunk_size: usize, sentence_overlap: usize) -> Self {
        Self {
            chunk_size,
            sentence_overlap,
        }
    }

    /// Clamp into `[80, 800]` characters and `[0, 3]` sentences.
    pub fn clamped(self) -> Self {
        Self {
            chunk_size: self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            sentence_overlap: self.sentence_overlap.min(MAX_SENTENCE_OVERLAP),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Sentence {
    text: String,
    len: usize,
    start: usize,
    end: usize,
}

/// Chunk every non-empty section of `document`.
pub fn chunk_document(document: &LoadedDocument, params: &ChunkingParams) -> Vec<DocumentChunk> {
    let params = params.clamped();
    let mut chunks = Vec::new();
    let mut next_seq = 0usize;

    for section in document.non_empty_sections() {
        let section_chunks = chunk_section(
            section,
            &document.metadata.document_id,
            &document.metadata.source_path,
            next_seq,
            &params,
        );
        next_seq += section_chunks.len();
        chunks.extend(section_chunks);
    }

    tracing::debug!(
        document_id = %document.metadata.document_id,
        chunks = chunks.len(),
        "chunked document"
    );
    chunks
}

/// Chunk a batch of documents, preserving document order.
pub fn chunk_documents(documents: &[LoadedDocument], params: &ChunkingParams) -> Vec<DocumentChunk> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(doc, params))
        .collect()
}

fn chunk_section(
    section: &DocumentSection,
    document_id: &str,
    source: &str,
    first_seq: usize,
    params: &ChunkingParams,
) -> Vec<DocumentChunk> {
    let sentences: Vec<Sentence> = split_sentences(&section.text)
        .into_iter()
        .flat_map(|s| window_sentence(s, params.chunk_size))
        .collect();

    let mut chunks = Vec::new();
    for group in merge_sentences(sentences, params.chunk_size, params.sentence_overlap) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let joined: String = group.iter().map(|s| s.text.as_str()).collect();
        let content = joined.trim();
        if content.is_empty() {
            continue;
        }

        let seq = first_seq + chunks.len();
        chunks.push(DocumentChunk {
            chunk_id: format!("{}_chunk_{:04}", document_id, seq),
            document_id: document_id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            section_title: section.title.clone(),
            section_level: Some(section.level),
            page_number: section.page_number,
            start_char: section.start_char + first.start,
            end_char: section.start_char + last.end,
            metadata: section.metadata.clone(),
        });
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<Sentence> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, &ch) in chars.iter().enumerate() {
        if start.is_none() {
            if ch.is_whitespace() {
                continue;
            }
            start = Some(idx);
        }
        if SENTENCE_DELIMITERS.contains(&ch) {
            if let Some(begin) = start.take() {
                push_trimmed(&chars, begin, idx + 1, &mut sentences);
            }
        }
    }
    if let Some(begin) = start {
        push_trimmed(&chars, begin, chars.len(), &mut sentences);
    }

    if sentences.is_empty() {
        push_trimmed(&chars, 0, chars.len(), &mut sentences);
    }
    sentences
}

fn push_trimmed(chars: &[char], begin: usize, end: usize, out: &mut Vec<Sentence>) {
    let span = &chars[begin..end];
    let lead = span.iter().take_while(|c| c.is_whitespace()).count();
    if lead == span.len() {
        return;
    }
    let trail = span.iter().rev().take_while(|c| c.is_whitespace()).count();
    let start = begin + lead;
    let stop = end - trail;
    out.push(Sentence {
        text: chars[start..stop].iter().collect(),
        len: stop - start,
        start,
        end: stop,
    });
}

fn window_sentence(sentence: Sentence, chunk_size: usize) -> Vec<Sentence> {
    if sentence.len <= chunk_size {
        return vec![sentence];
    }

    let chars: Vec<char> = sentence.text.chars().collect();
    let overlap = FALLBACK_OVERLAP_CHARS.min(chunk_size / 2);
    let stride = chunk_size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut offset = 0;

    loop {
        let stop = (offset + chunk_size).min(chars.len());
        windows.push(Sentence {
            text: chars[offset..stop].iter().collect(),
            len: stop - offset,
            start: sentence.start + offset,
            end: sentence.start + stop,
        });
        if stop >= chars.len() {
            break;
        }
        offset += stride;
    }
    windows
}

fn merge_sentences(sentences: Vec<Sentence>, chunk_size: usize, overlap: usize) -> Vec<Vec<Sentence>> {
    let mut groups = Vec::new();
    let mut buffer: Vec<Sentence> = Vec::new();
    let mut buffer_len = 0usize;

    for sentence in sentences {
        if !buffer.is_empty() && buffer_len + sentence.len > chunk_size {
            let keep_from = buffer.len().saturating_sub(overlap);
            let mut seed = buffer[keep_from..].to_vec();
            groups.push(std::mem::take(&mut buffer));

            let mut seed_len: usize = seed.iter().map(|s| s.len).sum();
            let seeded = seed.len();
            while !seed.is_empty() && seed_len + sentence.len > chunk_size {
                seed_len -= seed.remove(0).len;
            }
            if seed.len() < seeded {
                tracing::debug!(
                    dropped = seeded - seed.len(),
                    next_sentence_chars = sentence.len,
                    chunk_size,
                    "overlap sentences dropped to fit chunk size"
                );
            }
            buffer = seed;
            buffer_len = seed_len;
        }
        buffer_len += sentence.len;
        buffer.push(sentence);
    }

    if !buffer.is_empty() {
        groups.push(buffer);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;
    use std::collections::BTreeMap;

    fn section(id: &str, title: Option<&str>, text: &str, start: usize) -> DocumentSection {
        DocumentSection {
            section_id: id.to_string(),
            title: title.map(str::to_string),
            level: if title.is_some() { 2 } else { 1 },
            text: text.to_string(),
            start_char: start,
            end_char: start + text.chars().count(),
            page_number: None,
            metadata: BTreeMap::from([("lang".to_string(), "en".to_string())]),
        }
    }

    fn document(sections: Vec<DocumentSection>) -> LoadedDocument {
        let full_text = sections
            .iter()
            .map(|s| s.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        LoadedDocument {
            metadata: DocumentMetadata {
                document_id: "guide".to_string(),
                source_path: "/docs/guide.md".to_string(),
                media_type: "text/markdown".to_string(),
                extra: BTreeMap::new(),
            },
            sections,
            full_text,
        }
    }

    #[test]
    fn test_split_sentences_offsets() {
        let sentences = split_sentences("  Hello world! How are you?\nFine");
        let texts: Vec<&str> = sentences.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello world!", "How are you?", "Fine"]);
        assert_eq!(sentences[0].start, 2);
        assert_eq!(sentences[0].end, 14);
        assert_eq!(sentences[1].start, 15);
        assert_eq!(sentences[2].start, 28);
        assert_eq!(sentences[2].end, 32);
    }

    #[test]
    fn test_split_sentences_cjk_delimiters() {
        let sentences = split_sentences("云网融合是趋势。算力网络正在发展；未来可期！");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].text, "云网融合是趋势。");
        assert_eq!(sentences[0].len, 8);
        assert_eq!(sentences[1].start, 8);
    }

    #[test]
    fn test_split_sentences_blank() {
        assert!(split_sentences("   \n\t ").is_empty());
        assert!(split_sentences("").is_empty());
    }

    #[test]
    fn test_window_long_sentence() {
        let text = "x".repeat(250);
        let sentence = split_sentences(&text).remove(0);
        let windows = window_sentence(sentence, 100);
        // stride = 100 - 40 = 60: [0,100) [60,160) [120,220) [180,250)
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[1].start, 60);
        assert_eq!(windows[3].end, 250);
        assert!(windows.iter().all(|w| w.len <= 100));
    }

    #[test]
    fn test_clamp() {
        assert_eq!(ChunkingParams::new(10, 9).clamped(), ChunkingParams::new(80, 3));
        assert_eq!(ChunkingParams::new(5000, 0).clamped(), ChunkingParams::new(800, 0));
        assert_eq!(ChunkingParams::default().clamped(), ChunkingParams::default());
    }

    #[test]
    fn test_size_bound_across_clamp_range() {
        let text = "Short one. ".repeat(3)
            + &"A much longer sentence that keeps going and going without any stop "
                .repeat(20)
            + "! Tail.";
        let doc = document(vec![section("sec_000", None, &text, 0)]);
        for size in [20, 80, 120, 220, 280, 500, 800, 2000] {
            for overlap in 0..=4 {
                let params = ChunkingParams::new(size, overlap);
                let limit = params.clamped().chunk_size + FALLBACK_OVERLAP_CHARS;
                for chunk in chunk_document(&doc, &params) {
                    assert!(chunk.len() <= limit, "size {size}: {} > {limit}", chunk.len());
                    assert!(!chunk.content.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_overlap_repeats_last_sentence() {
        let sentences: Vec<String> = (0..12)
            .map(|i| format!("Sentence number {i:02} has some words;"))
            .collect();
        let doc = document(vec![section("sec_000", None, &sentences.join(" "), 0)]);
        let chunks = chunk_document(&doc, &ChunkingParams::new(100, 1));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_of_prev = pair[0].content.rsplit(';').nth(1).unwrap().trim();
            assert!(pair[1].content.starts_with(last_of_prev));
        }
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_oversized_overlap_is_dropped_and_logged() {
        let text = format!("{};{};{};", "A".repeat(29), "B".repeat(59), "C".repeat(79));
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let groups = tracing::subscriber::with_default(subscriber, || {
            merge_sentences(split_sentences(&text), 100, 1)
        });

        let lens: Vec<Vec<usize>> = groups
            .iter()
            .map(|g| g.iter().map(|s| s.len).collect())
            .collect();
        assert_eq!(lens, vec![vec![30, 60], vec![80]]);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("overlap sentences dropped"), "{output}");
        assert!(output.contains("dropped=1"), "{output}");
    }

    #[test]
    fn test_no_overlap() {
        let sentences: Vec<String> = (0..12)
            .map(|i| format!("Sentence number {i:02} has some words;"))
            .collect();
        let doc = document(vec![section("sec_000", None, &sentences.join(" "), 0)]);
        let chunks = chunk_document(&doc, &ChunkingParams::new(100, 0));
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined.matches("Sentence number").count(), 12);
    }

    #[test]
    fn test_chunk_ids_continue_across_sections() {
        let doc = document(vec![
            section("sec_000", Some("Intro"), "First part; second part.", 0),
            section("sec_001", Some("Empty"), "   ", 30),
            section("sec_002", Some("Usage"), "Run it! Check it?", 40),
        ]);
        let chunks = chunk_document(&doc, &ChunkingParams::default());
        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["guide_chunk_0000", "guide_chunk_0001"]);
        assert_eq!(chunks[0].section_title.as_deref(), Some("Intro"));
        assert_eq!(chunks[1].section_title.as_deref(), Some("Usage"));
        assert_eq!(chunks[1].start_char, 40);
        assert_eq!(chunks[1].end_char, 40 + "Run it! Check it?".len());
        assert_eq!(chunks[1].source, "/docs/guide.md");
    }

    #[test]
    fn test_offsets_monotonic() {
        let text = (0..40)
            .map(|i| format!("Line {i} of the section!"))
            .collect::<Vec<_>>()
            .join("\n");
        let doc = document(vec![section("sec_000", None, &text, 12)]);
        let chunks = chunk_document(&doc, &ChunkingParams::new(80, 2));
        assert!(chunks.len() > 3);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_char <= pair[1].start_char);
        }
        assert_eq!(chunks[0].start_char, 12);
    }

    #[test]
    fn test_idempotent() {
        let doc = document(vec![section(
            "sec_000",
            Some("Body"),
            &"Repeatable text; with clauses! And questions? ".repeat(30),
            0,
        )]);
        let params = ChunkingParams::new(150, 2);
        assert_eq!(chunk_document(&doc, &params), chunk_document(&doc, &params));
    }

    #[test]
    fn test_metadata_isolation() {
        let doc = document(vec![section("sec_000", None, "Alpha; beta.", 0)]);
        let mut chunks = chunk_document(&doc, &ChunkingParams::default());
        chunks[0]
            .metadata
            .insert("lang".to_string(), "changed".to_string());
        assert_eq!(doc.sections[0].metadata["lang"], "en");
        assert_eq!(chunk_document(&doc, &ChunkingParams::default())[0].metadata["lang"], "en");
    }

    #[test]
    fn test_empty_document() {
        let doc = document(vec![section("sec_000", None, "\n\n  ", 0)]);
        assert!(chunk_document(&doc, &ChunkingParams::default()).is_empty());
    }
}
