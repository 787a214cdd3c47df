//! Text extraction for binary document formats (PDF, DOCX).
//!
//! Extraction works on in-memory bytes and keeps the structure the loaders
//! need: one string per PDF page, and one entry per DOCX paragraph with its
//! resolved style name. Failures are returned, never panicked on.

use std::collections::HashMap;
use std::io::Read;

use quick_xml::events::{BytesStart, Event};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";
const DOCX_STYLES: &str = "word/styles.xml";

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// A DOCX paragraph with its style name (the style id when `styles.xml`
/// has no entry for it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxParagraph {
    pub text: String,
    pub style: Option<String>,
}

/// Text of every PDF page, in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Paragraphs of `word/document.xml` in document order, blanks included.
pub fn extract_docx_paragraphs(bytes: &[u8]) -> Result<Vec<DocxParagraph>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;

    let has_styles = archive.file_names().any(|name| name == DOCX_STYLES);
    let styles = if has_styles {
        let xml = read_zip_entry_bounded(&mut archive, DOCX_STYLES, MAX_XML_ENTRY_BYTES)?;
        parse_style_names(&xml)?
    } else {
        HashMap::new()
    };

    let body = read_zip_entry_bounded(&mut archive, DOCX_BODY, MAX_XML_ENTRY_BYTES)?;
    let mut paragraphs = parse_paragraphs(&body)?;
    for paragraph in &mut paragraphs {
        if let Some(id) = paragraph.style.take() {
            paragraph.style = Some(styles.get(&id).cloned().unwrap_or(id));
        }
    }
    Ok(paragraphs)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn attr_value(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Map `w:styleId` to the human-readable `w:name` of each style.
fn parse_style_names(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut names = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"style" => current = attr_value(&e, b"styleId"),
                b"name" => {
                    if let (Some(id), Some(name)) = (current.as_ref(), attr_value(&e, b"val")) {
                        names.insert(id.clone(), name);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"style" {
                    current = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn parse_paragraphs(xml: &[u8]) -> Result<Vec<DocxParagraph>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut open: Vec<DocxParagraph> = Vec::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => open.push(DocxParagraph::default()),
                b"pStyle" => set_style(&mut open, &e),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(DocxParagraph::default()),
                b"pStyle" => set_style(&mut open, &e),
                b"tab" => push_text(&mut open, "\t"),
                b"br" | b"cr" => push_text(&mut open, "\n"),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                push_text(&mut open, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(paragraph) = open.pop() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn set_style(open: &mut [DocxParagraph], element: &BytesStart<'_>) {
    if let Some(paragraph) = open.last_mut() {
        paragraph.style = attr_value(element, b"val");
    }
}

fn push_text(open: &mut [DocxParagraph], text: &str) {
    if let Some(paragraph) = open.last_mut() {
        paragraph.text.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    fn docx(body: &str, styles: Option<&str>) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file(DOCX_BODY, options).unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"{}\"><w:body>{}</w:body></w:document>",
                W_NS, body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            if let Some(styles) = styles {
                zip.start_file(DOCX_STYLES, options).unwrap();
                let xml = format!("<?xml version=\"1.0\"?><w:styles xmlns:w=\"{}\">{}</w:styles>", W_NS, styles);
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_docx_paragraphs_keep_spacing_and_runs() {
        let bytes = docx(
            "<w:p><w:r><w:t xml:space=\"preserve\">Hello </w:t></w:r><w:r><w:t>world &amp; co</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t></w:r></w:p>",
            None,
        );
        let paragraphs = extract_docx_paragraphs(&bytes).unwrap();
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].text, "Hello world & co");
        assert_eq!(paragraphs[1].text, "");
        assert_eq!(paragraphs[2].text, "a\tb");
        assert!(paragraphs.iter().all(|p| p.style.is_none()));
    }

    #[test]
    fn test_docx_style_ids_resolve_to_names() {
        let bytes = docx(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading2\"/></w:pPr><w:r><w:t>Scope</w:t></w:r></w:p>\
             <w:p><w:pPr><w:pStyle w:val=\"Custom9\"/></w:pPr><w:r><w:t>Body</w:t></w:r></w:p>",
            Some(
                "<w:style w:type=\"paragraph\" w:styleId=\"Heading2\"><w:name w:val=\"heading 2\"/></w:style>\
                 <w:style w:type=\"paragraph\" w:styleId=\"Normal\"><w:name w:val=\"Normal\"/></w:style>",
            ),
        );
        let paragraphs = extract_docx_paragraphs(&bytes).unwrap();
        assert_eq!(paragraphs[0].style.as_deref(), Some("heading 2"));
        // unknown ids fall back to the id itself
        assert_eq!(paragraphs[1].style.as_deref(), Some("Custom9"));
    }

    #[test]
    fn test_docx_missing_body() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(
            extract_docx_paragraphs(&buf),
            Err(ExtractError::Ooxml(_))
        ));
    }

    #[test]
    fn test_invalid_containers() {
        assert!(extract_docx_paragraphs(b"not a zip").is_err());
        assert!(matches!(
            extract_pdf_pages(b"not a pdf"),
            Err(ExtractError::Pdf(_))
        ));
    }
}
