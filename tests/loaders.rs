//! Loader + chunker behaviour on real files of every supported format.

use std::io::Write;
use std::path::{Path, PathBuf};

use evidex::loader::{collect_paths, load};
use evidex_core::chunk::{chunk_document, ChunkingParams};
use evidex_core::Error;
use tempfile::TempDir;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Single-page PDF showing `text` in Helvetica, with a correct xref table.
fn pdf_with_text(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn docx(body: &str, styles: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"{}\"><w:body>{}</w:body></w:document>",
            W_NS, body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.start_file("word/styles.xml", options).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:styles xmlns:w=\"{}\">{}</w:styles>",
            W_NS, styles
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn para(style: Option<&str>, text: &str) -> String {
    let ppr = style
        .map(|s| format!("<w:pPr><w:pStyle w:val=\"{}\"/></w:pPr>", s))
        .unwrap_or_default();
    format!("<w:p>{}<w:r><w:t>{}</w:t></w:r></w:p>", ppr, text)
}

#[test]
fn markdown_headings_become_chunk_titles() {
    let tmp = TempDir::new().unwrap();
    let body_a = "The intake valve opens at 40 bar; it closes below 35 bar.\n".repeat(6);
    let body_b = "Operators log readings every shift!\nAnomalies go to the on-call engineer.\n".repeat(4);
    let text = format!("## Valves\n\n{}\n## Logging\n\n{}", body_a, body_b);
    let path = write(tmp.path(), "ops.md", text.as_bytes());

    let document = load(&path).unwrap();
    assert_eq!(document.metadata.document_id, "ops");
    assert_eq!(document.metadata.media_type, "text/markdown");

    let chunks = chunk_document(&document, &ChunkingParams::new(220, 1));
    assert!(chunks
        .iter()
        .any(|c| c.section_title.as_deref() == Some("Valves")));
    assert!(chunks
        .iter()
        .any(|c| c.section_title.as_deref() == Some("Logging")));

    for chunk in &chunks {
        assert!(chunk.len() <= 220 + 40, "{} is {} chars", chunk.chunk_id, chunk.len());
        assert!(chunk.start_char < chunk.end_char);
        assert_eq!(chunk.section_level, Some(2));
        assert_eq!(chunk.source, path.display().to_string());
    }
    for pair in chunks.windows(2) {
        assert!(pair[0].start_char <= pair[1].start_char);
    }
    let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids[0], "ops_chunk_0000");
    assert_eq!(ids[1], "ops_chunk_0001");
}

#[test]
fn plain_text_chunks_are_untitled() {
    let tmp = TempDir::new().unwrap();
    let text = "First line of notes.\nSecond line of notes!\n".repeat(20);
    let path = write(tmp.path(), "notes.TXT", text.as_bytes());

    let document = load(&path).unwrap();
    assert_eq!(document.sections.len(), 1);
    let chunks = chunk_document(&document, &ChunkingParams::default());
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.section_title.is_none()));
    assert!(chunks.iter().all(|c| c.page_number.is_none()));
}

#[test]
fn pdf_chunks_carry_page_numbers() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        tmp.path(),
        "manual.pdf",
        &pdf_with_text("Pump pressure is nominal! Check the valves daily!"),
    );

    let document = load(&path).unwrap();
    assert_eq!(document.metadata.media_type, "application/pdf");
    assert_eq!(document.sections.len(), 1);
    assert_eq!(document.sections[0].section_id, "page_001");

    let chunks = chunk_document(&document, &ChunkingParams::default());
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert_eq!(chunk.page_number, Some(1));
        assert_eq!(chunk.section_title.as_deref(), Some("Page 1"));
    }
    let joined: String = chunks
        .iter()
        .flat_map(|c| c.content.split_whitespace())
        .collect();
    assert!(joined.contains("Pumppressure"), "extracted: {}", joined);
}

#[test]
fn docx_localized_heading_styles() {
    let tmp = TempDir::new().unwrap();
    let body = [
        para(None, "前言段落。"),
        para(Some("CNTitle1"), "系统概述"),
        para(None, "本系统用于文档检索。"),
        para(None, ""),
        para(None, "支持混合检索。"),
        para(Some("Heading2"), "Installation"),
        para(None, "Run the installer."),
    ]
    .concat();
    let styles = "<w:style w:type=\"paragraph\" w:styleId=\"CNTitle1\"><w:name w:val=\"标题 1\"/></w:style>";
    let path = write(tmp.path(), "guide.docx", &docx(&body, styles));

    let document = load(&path).unwrap();
    let titles: Vec<Option<&str>> = document.sections.iter().map(|s| s.title.as_deref()).collect();
    assert_eq!(titles, vec![None, Some("系统概述"), Some("Installation")]);
    assert_eq!(document.sections[1].level, 1);
    assert_eq!(document.sections[2].level, 2);
    assert_eq!(document.sections[1].text, "本系统用于文档检索。\n支持混合检索。");
    assert!(document.full_text.starts_with("前言段落。\n系统概述\n"));

    let chunks = chunk_document(&document, &ChunkingParams::default());
    let install = chunks
        .iter()
        .find(|c| c.section_title.as_deref() == Some("Installation"))
        .unwrap();
    assert_eq!(install.content, "Run the installer.");
    assert_eq!(install.section_level, Some(2));
}

#[test]
fn unsupported_extension_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "data.csv", b"a,b\n1,2\n");
    match load(&path) {
        Err(Error::UnsupportedFormat { extension, .. }) => assert_eq!(extension, ".csv"),
        other => panic!("expected UnsupportedFormat, got {:?}", other),
    }
}

#[test]
fn corrupt_pdf_is_an_extract_error() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "broken.pdf", b"%PDF-1.4 nothing else");
    assert!(matches!(load(&path), Err(Error::Extract { .. })));
}

#[test]
fn collect_paths_applies_globs() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir_all(root.join("docs/drafts")).unwrap();
    std::fs::create_dir_all(root.join(".git")).unwrap();
    write(root, "docs/a.md", b"# A");
    write(root, "docs/drafts/b.md", b"# B");
    write(root, "docs/c.txt", b"c");
    write(root, "docs/d.csv", b"d");
    write(root, ".git/e.md", b"e");

    let include = vec!["**/*.md".to_string(), "**/*.txt".to_string()];
    let files = collect_paths(&[root.to_path_buf()], &include, &["**/drafts/**".to_string()]).unwrap();
    assert_eq!(files, vec![root.join("docs/a.md"), root.join("docs/c.txt")]);
}
