//! Document loaders: plain text, Markdown, PDF and DOCX.
//!
//! Each loader turns one file into a [`LoadedDocument`] whose sections carry
//! character offsets into the document's full text. The loader is chosen by
//! lower-cased file extension; anything else is
//! [`Error::UnsupportedFormat`].
//!
//! Also home to [`collect_paths`], which expands directory arguments into
//! the sorted list of files to index.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use evidex_core::models::{DocumentMetadata, DocumentSection, LoadedDocument};
use evidex_core::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::extract::{self, DocxParagraph, MIME_DOCX, MIME_PDF};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

const LOCALIZED_HEADING: &str = "标题";

/// Load a single file, dispatching on its extension.
pub fn load(path: &Path) -> Result<LoadedDocument> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let document = match extension.as_str() {
        "txt" => load_plain_text(path)?,
        "md" | "markdown" => load_markdown(path)?,
        "pdf" => load_pdf(path)?,
        "docx" => load_docx(path)?,
        _ => {
            return Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: if extension.is_empty() {
                    "<none>".to_string()
                } else {
                    format!(".{}", extension)
                },
            })
        }
    };

    tracing::debug!(
        path = %path.display(),
        sections = document.sections.len(),
        "loaded document"
    );
    Ok(document)
}

/// Load every path in order, failing on the first error.
///
/// Document ids are file stems, so files sharing a stem (`a/README.md` and
/// `b/README.md`, or `notes.md` beside `notes.txt`) get a numeric suffix in
/// load order: `README`, `README_2`, ...
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<LoadedDocument>> {
    let mut taken = HashSet::new();
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let mut document = load(path)?;
        let id = unique_document_id(&document.metadata.document_id, &mut taken);
        if id != document.metadata.document_id {
            tracing::debug!(
                path = %path.display(),
                stem = %document.metadata.document_id,
                document_id = %id,
                "renamed document with duplicate stem"
            );
            document.metadata.document_id = id;
        }
        documents.push(document);
    }
    Ok(documents)
}

fn unique_document_id(stem: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(stem.to_string()) {
        return stem.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", stem, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Strip a leading BOM and normalize line endings to `\n`.
pub fn sanitize(text: &str) -> String {
    text.trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    Ok(sanitize(&text))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn metadata_for(path: &Path, media_type: &str) -> DocumentMetadata {
    DocumentMetadata {
        document_id: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        source_path: path.display().to_string(),
        media_type: media_type.to_string(),
        extra: BTreeMap::new(),
    }
}

fn section(
    index: usize,
    title: Option<String>,
    level: u32,
    text: String,
    start_char: usize,
    end_char: usize,
) -> DocumentSection {
    DocumentSection {
        section_id: format!("sec_{:03}", index),
        title,
        level,
        text,
        start_char,
        end_char,
        page_number: None,
        metadata: BTreeMap::new(),
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn load_plain_text(path: &Path) -> Result<LoadedDocument> {
    let text = read_text(path)?;
    let len = char_len(&text);
    Ok(LoadedDocument {
        metadata: metadata_for(path, MIME_TEXT),
        sections: vec![section(0, None, 1, text.clone(), 0, len)],
        full_text: text,
    })
}

pub fn load_markdown(path: &Path) -> Result<LoadedDocument> {
    let text = read_text(path)?;
    Ok(LoadedDocument {
        metadata: metadata_for(path, MIME_MARKDOWN),
        sections: markdown_sections(&text),
        full_text: text,
    })
}

/// `(level, title)` when the trimmed line is an ATX heading.
fn parse_heading(line: &str) -> Option<(u32, String)> {
    let trimmed = line.trim();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((hashes as u32, rest.trim().to_string()))
}

/// Split Markdown into heading-delimited sections.
///
/// Heading lines are not part of any section. Content before the first
/// heading becomes an untitled level-1 section, and a document with no
/// body at all yields one section spanning the whole text.
pub fn markdown_sections(text: &str) -> Vec<DocumentSection> {
    let mut sections = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut title: Option<String> = None;
    let mut level = 1u32;
    let mut start = 0usize;
    let mut cursor = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = char_len(line);
        if let Some((heading_level, heading_title)) = parse_heading(line) {
            if !lines.is_empty() {
                let body = lines.concat().trim().to_string();
                sections.push(section(sections.len(), title.take(), level, body, start, cursor));
                lines.clear();
            }
            level = heading_level;
            title = Some(heading_title);
            start = cursor + line_len;
        } else {
            if lines.is_empty() {
                start = cursor;
            }
            lines.push(line);
        }
        cursor += line_len;
    }

    if !lines.is_empty() {
        let body = lines.concat().trim().to_string();
        sections.push(section(sections.len(), title, level, body, start, cursor));
    }

    if sections.is_empty() {
        sections.push(section(0, None, 1, text.trim().to_string(), 0, cursor));
    }
    sections
}

pub fn load_pdf(path: &Path) -> Result<LoadedDocument> {
    let bytes = read_bytes(path)?;
    let pages = extract::extract_pdf_pages(&bytes).map_err(|e| Error::Extract {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut sections = Vec::with_capacity(pages.len());
    let mut full_text = String::new();
    let mut offset = 0usize;
    for (idx, page) in pages.iter().enumerate() {
        let number = idx as u32 + 1;
        let text = sanitize(page);
        let end = offset + char_len(&text);
        full_text.push_str(&text);
        sections.push(DocumentSection {
            section_id: format!("page_{:03}", number),
            title: Some(format!("Page {}", number)),
            level: 1,
            text,
            start_char: offset,
            end_char: end,
            page_number: Some(number),
            metadata: BTreeMap::new(),
        });
        offset = end;
    }

    Ok(LoadedDocument {
        metadata: metadata_for(path, MIME_PDF),
        sections,
        full_text,
    })
}

pub fn load_docx(path: &Path) -> Result<LoadedDocument> {
    let bytes = read_bytes(path)?;
    let paragraphs = extract::extract_docx_paragraphs(&bytes).map_err(|e| Error::Extract {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let (sections, full_text) = docx_sections(&paragraphs);
    Ok(LoadedDocument {
        metadata: metadata_for(path, MIME_DOCX),
        sections,
        full_text,
    })
}

/// Heading level for a paragraph style, or `None` for body text.
fn heading_level(style: &str) -> Option<u32> {
    if !style.to_lowercase().starts_with("heading") && !style.contains(LOCALIZED_HEADING) {
        return None;
    }
    let digits: String = style
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some(digits.parse().unwrap_or(1))
}

/// Group DOCX paragraphs into heading-delimited sections.
pub fn docx_sections(paragraphs: &[DocxParagraph]) -> (Vec<DocumentSection>, String) {
    let mut sections = Vec::new();
    let mut full_text = String::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut title: Option<String> = None;
    let mut level = 1u32;
    let mut start = 0usize;
    let mut offset = 0usize;

    for paragraph in paragraphs {
        let text = paragraph.text.trim();
        if text.is_empty() {
            continue;
        }
        full_text.push_str(text);
        full_text.push('\n');
        let next_offset = offset + char_len(text) + 1;

        match paragraph.style.as_deref().and_then(heading_level) {
            Some(heading) => {
                if !lines.is_empty() {
                    let body = lines.join("\n").trim().to_string();
                    sections.push(section(sections.len(), title.clone(), level, body, start, offset));
                    lines.clear();
                }
                title = Some(text.to_string());
                level = heading;
                start = offset;
            }
            None => {
                if lines.is_empty() {
                    start = offset;
                }
                lines.push(text);
            }
        }
        offset = next_offset;
    }

    if !lines.is_empty() {
        let body = lines.join("\n").trim().to_string();
        sections.push(section(sections.len(), title, level, body, start, offset));
    }

    let full_text = full_text.trim().to_string();
    if sections.is_empty() && !full_text.is_empty() {
        let len = char_len(&full_text);
        sections.push(section(0, None, 1, full_text.clone(), 0, len));
    }
    (sections, full_text)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Expand files and directories into a sorted, de-duplicated file list.
///
/// Explicit file arguments are kept as given. Directories are walked and
/// filtered by the include and exclude globs, matched against paths
/// relative to the directory.
pub fn collect_paths(
    roots: &[PathBuf],
    include_globs: &[String],
    exclude_globs: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    let include = build_globset(include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut files = Vec::new();
    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.is_dir() {
            anyhow::bail!("Path does not exist: {}", root.display());
        }

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if exclude.is_match(relative) || !include.is_match(relative) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
